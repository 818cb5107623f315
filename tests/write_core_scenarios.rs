//! End-to-end write-core scenarios through the synthesized operation table.

mod helpers;

use helpers::{bootstrap, json_map, DATASET_URN};
use metagraph::{GraphStore, OpOutput, OpRequest};
use serde_json::json;

fn dataset_request() -> OpRequest {
    OpRequest {
        params: json_map(json!({
            "platform": "mysql",
            "name": "test_db.test_table",
            "env": "PROD"
        })),
        ..OpRequest::default()
    }
}

fn aspect_request(payload: serde_json::Value) -> OpRequest {
    OpRequest {
        entity_urn: Some(DATASET_URN.to_string()),
        payload: Some(payload),
        ..OpRequest::default()
    }
}

/// Scenario 1: entity upsert, aspect upsert, read latest.
#[tokio::test]
async fn entity_then_aspect_then_read_latest() {
    let (catalog, _store) = bootstrap().await;
    let ops = catalog.operations();

    let out = ops
        .execute("upsert_dataset", dataset_request())
        .await
        .unwrap();
    let OpOutput::Write(outcome) = out else {
        panic!("expected write outcome");
    };
    assert_eq!(outcome.urn, DATASET_URN);
    assert!(outcome.created_entity.is_some());

    let out = ops
        .execute(
            "upsert_datasetproperties_aspect",
            aspect_request(json!({"description": "x"})),
        )
        .await
        .unwrap();
    let OpOutput::Write(outcome) = out else {
        panic!("expected write outcome");
    };
    assert_eq!(outcome.version, Some(1));

    let out = ops
        .execute("get_datasetproperties_aspect", aspect_request(json!(null)))
        .await
        .unwrap();
    let OpOutput::Aspect { aspect } = out else {
        panic!("expected aspect output");
    };
    let aspect = aspect.expect("latest aspect exists");
    assert_eq!(aspect.version, Some(1));
    assert_eq!(aspect.payload, json!({"description": "x"}));
}

/// Scenario 2: three upserts produce versions {1,2,3}, only v3 latest.
#[tokio::test]
async fn versioning_is_monotone() {
    let (catalog, store) = bootstrap().await;
    let ops = catalog.operations();
    ops.execute("upsert_dataset", dataset_request())
        .await
        .unwrap();

    for i in 1..=3u64 {
        let out = ops
            .execute(
                "upsert_datasetproperties_aspect",
                aspect_request(json!({"description": format!("rev {i}")})),
            )
            .await
            .unwrap();
        let OpOutput::Write(outcome) = out else {
            panic!("expected write outcome");
        };
        assert_eq!(outcome.version, Some(i));
    }

    let versions = store.all_versions(DATASET_URN, "datasetProperties").await;
    assert_eq!(
        versions.iter().map(|r| r.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    let latest: Vec<u64> = versions
        .iter()
        .filter(|r| r.latest)
        .map(|r| r.version)
        .collect();
    assert_eq!(latest, vec![3]);
}

/// Scenario 3: ownership payload materializes an OWNED_BY edge and
/// auto-creates the CorpUser.
#[tokio::test]
async fn ownership_rule_creates_edge_and_user() {
    let (catalog, store) = bootstrap().await;
    let ops = catalog.operations();
    ops.execute("upsert_dataset", dataset_request())
        .await
        .unwrap();

    let out = ops
        .execute(
            "upsert_ownership_aspect",
            aspect_request(json!({
                "owners": [{"owner": "urn:li:corpuser:alice", "type": "DATA_OWNER"}]
            })),
        )
        .await
        .unwrap();
    let OpOutput::Write(outcome) = out else {
        panic!("expected write outcome");
    };
    assert_eq!(outcome.created_relationships.len(), 1);
    let rel = &outcome.created_relationships[0];
    assert_eq!(rel.rel_type, "OWNED_BY");
    assert_eq!(rel.src_urn, DATASET_URN);
    assert_eq!(rel.dst_urn, "urn:li:corpuser:alice");
    assert!(rel.created);

    assert!(store.node_exists("urn:li:corpuser:alice").await.unwrap());
    let edges = store.relationships_from(DATASET_URN).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].props.get("type"), Some(&json!("DATA_OWNER")));
    assert_eq!(edges[0].via.as_deref(), Some("ownership"));
}

/// Scenario 4: cascade delete removes the node, its aspects, and incident
/// edges, and nothing else.
#[tokio::test]
async fn cascade_delete_removes_exactly_the_entity_graph() {
    let (catalog, store) = bootstrap().await;
    let ops = catalog.operations();
    ops.execute("upsert_dataset", dataset_request())
        .await
        .unwrap();
    ops.execute(
        "upsert_datasetproperties_aspect",
        aspect_request(json!({"description": "x"})),
    )
    .await
    .unwrap();
    ops.execute(
        "upsert_ownership_aspect",
        aspect_request(json!({
            "owners": [{"owner": "urn:li:corpuser:alice", "type": "DATA_OWNER"}]
        })),
    )
    .await
    .unwrap();

    let out = ops
        .execute(
            "delete_dataset",
            OpRequest {
                entity_urn: Some(DATASET_URN.to_string()),
                cascade: true,
                ..OpRequest::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(out, OpOutput::Deleted { .. }));

    assert!(!store.node_exists(DATASET_URN).await.unwrap());
    assert!(store
        .all_versions(DATASET_URN, "datasetProperties")
        .await
        .is_empty());
    assert!(store
        .all_versions(DATASET_URN, "ownership")
        .await
        .is_empty());
    assert_eq!(store.edge_count().await, 0);
    // The auto-created CorpUser node is not part of the cascade.
    assert!(store.node_exists("urn:li:corpuser:alice").await.unwrap());
}

/// Scenario 5: 10 concurrent upserts of schemaMetadata yield versions 1..10
/// with a single latest and no lost writes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_versioned_writes_are_linearizable() {
    let (catalog, store) = bootstrap().await;
    let catalog = std::sync::Arc::new(catalog);
    catalog
        .operations()
        .execute("upsert_dataset", dataset_request())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let catalog = catalog.clone();
        handles.push(tokio::spawn(async move {
            let out = catalog
                .operations()
                .execute(
                    "upsert_schemametadata_aspect",
                    aspect_request(json!({"schemaName": format!("writer-{i}")})),
                )
                .await
                .unwrap();
            match out {
                OpOutput::Write(outcome) => outcome.version.unwrap(),
                _ => panic!("expected write outcome"),
            }
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=10).collect::<Vec<u64>>());

    let records = store.all_versions(DATASET_URN, "schemaMetadata").await;
    assert_eq!(records.len(), 10);
    let latest: Vec<u64> = records
        .iter()
        .filter(|r| r.latest)
        .map(|r| r.version)
        .collect();
    assert_eq!(latest, vec![10]);
}

/// Scenario 6: a HASHING transformation expands into a DERIVES_FROM edge
/// with the pattern's subtype and the default description template.
#[tokio::test]
async fn lineage_template_expands_transformation() {
    let (catalog, store) = bootstrap().await;
    let ops = catalog.operations();

    let column_params = json_map(json!({
        "dataset_urn": DATASET_URN,
        "field_path": "email_hash"
    }));
    let out = ops
        .execute(
            "upsert_transformation_aspect",
            OpRequest {
                params: column_params,
                payload: Some(json!({
                    "transformation_type": "HASHING",
                    "input_columns": ["customer_email"]
                })),
                ..OpRequest::default()
            },
        )
        .await
        .unwrap();

    let OpOutput::Write(outcome) = out else {
        panic!("expected write outcome");
    };
    // The owning Column was materialized from params.
    assert!(outcome.created_entity.is_some());
    assert_eq!(outcome.version, Some(1));
    assert_eq!(outcome.created_relationships.len(), 1);
    let rel = &outcome.created_relationships[0];
    assert_eq!(rel.rel_type, "DERIVES_FROM");
    assert_eq!(rel.src_urn, outcome.urn);

    let edges = store.relationships_from(&outcome.urn).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].props.get("subtype"), Some(&json!("HASHING")));
    assert_eq!(edges[0].props.get("masking"), Some(&json!("true")));
    assert_eq!(
        edges[0].props.get("description"),
        Some(&json!("Derived from customer_email via HASHING"))
    );
    // The input column exists URN-only.
    assert!(store.node_exists(&rel.dst_urn).await.unwrap());
}
