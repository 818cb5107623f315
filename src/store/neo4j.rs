//! Bolt-backed `GraphStore` for a Neo4j-compatible property graph.
//!
//! Labels and relationship types are spliced into query text (Cypher cannot
//! parameterize them); both are restricted to identifier characters by
//! registry validation before they can reach this module. All values travel
//! as bound parameters. Aspect payloads are stored as a JSON document in the
//! `json` property of the aspect node.

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query};
use serde_json::Value;
use tracing::debug;

use super::{
    DependentCounts, EdgeMergeSpec, EdgeRecord, GraphStore, JsonMap, MergeOutcome, NodeRecord,
    TimeseriesAspectRecord, VersionedAspectRecord,
};
use crate::config::StoreConfig;
use crate::error::{CatalogError, Result};
use crate::registry::Registry;

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Open a bounded session pool against the configured store.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let graph_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_sessions as usize)
            .build()
            .map_err(|e| unavailable(e.to_string(), false))?;
        let graph = Graph::connect(graph_config)
            .await
            .map_err(|e| unavailable(e.to_string(), true))?;
        Ok(Self { graph })
    }
}

fn unavailable(detail: String, transient: bool) -> CatalogError {
    CatalogError::StoreUnavailable { detail, transient }
}

/// Classify a driver error: constraint races become `StoreConflict`, the
/// rest surfaces as (transient) unavailability.
fn map_store_error(err: neo4rs::Error, urn: &str, aspect_name: &str) -> CatalogError {
    let text = err.to_string();
    if text.contains("ConstraintValidation") || text.contains("already exists") {
        CatalogError::StoreConflict {
            urn: urn.to_string(),
            aspect_name: aspect_name.to_string(),
            detail: text,
        }
    } else {
        unavailable(text, true)
    }
}

fn io_err(err: neo4rs::Error) -> CatalogError {
    unavailable(err.to_string(), true)
}

/// Backtick-quote a dynamic property key.
fn quoted(key: &str) -> String {
    format!("`{}`", key.replace('`', ""))
}

/// Bind a JSON value onto a query as `$name`. Scalars map to native Bolt
/// types; arrays and objects travel as JSON text, matching the payload
/// storage convention.
fn bind(q: Query, name: &str, value: &Value) -> Query {
    match value {
        Value::String(s) => q.param(name, s.as_str()),
        Value::Bool(b) => q.param(name, *b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.param(name, i)
            } else {
                q.param(name, n.as_f64().unwrap_or(0.0))
            }
        }
        Value::Null => q.param(name, ""),
        other => q.param(name, other.to_string()),
    }
}

/// `SET` fragment assigning each property through its own parameter.
fn set_clause(target: &str, props: &JsonMap, prefix: &str) -> (String, Vec<(String, Value)>) {
    let mut fragments = Vec::new();
    let mut params = Vec::new();
    for (i, (key, value)) in props.iter().enumerate() {
        let param = format!("{prefix}{i}");
        fragments.push(format!("{target}.{} = ${param}", quoted(key)));
        params.push((param, value.clone()));
    }
    (fragments.join(", "), params)
}

fn payload_json(payload: &Value) -> Result<String> {
    Ok(serde_json::to_string(payload)?)
}

fn parse_payload(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn ensure_constraints(&self, registry: &Registry) -> Result<()> {
        let mut statements: Vec<String> = Vec::new();
        for entity in registry.entity_types() {
            statements.push(format!(
                "CREATE CONSTRAINT {}_urn_unique IF NOT EXISTS FOR (n:{entity}) REQUIRE n.urn IS UNIQUE",
                entity.to_lowercase()
            ));
        }
        // Backs the (urn, aspect_name, version) race: the aspect id is the
        // concatenation of all three.
        statements.push(
            "CREATE CONSTRAINT aspect_identity IF NOT EXISTS FOR (a:Aspect) REQUIRE a.id IS UNIQUE"
                .to_string(),
        );
        statements.push(
            "CREATE INDEX aspect_name_version IF NOT EXISTS FOR (a:Aspect) ON (a.name, a.version)"
                .to_string(),
        );
        for rule in registry.relationship_rules() {
            for disc in &rule.edge.discriminators {
                statements.push(format!(
                    "CREATE INDEX rel_{}_{} IF NOT EXISTS FOR ()-[r:{}]-() ON (r.{})",
                    rule.edge.rel_type.to_lowercase(),
                    disc.to_lowercase(),
                    rule.edge.rel_type,
                    quoted(disc)
                ));
            }
        }
        for statement in statements {
            debug!("bootstrap: {statement}");
            self.graph.run(query(&statement)).await.map_err(io_err)?;
        }
        Ok(())
    }

    async fn upsert_node(
        &self,
        label: &str,
        urn: &str,
        props: &JsonMap,
        now_ms: i64,
    ) -> Result<()> {
        let (set, params) = set_clause("e", props, "p");
        let text = if set.is_empty() {
            format!("MERGE (e:{label} {{urn:$urn}}) SET e.lastUpdated = $now")
        } else {
            format!("MERGE (e:{label} {{urn:$urn}}) SET {set}, e.lastUpdated = $now")
        };
        let mut q = query(&text).param("urn", urn).param("now", now_ms);
        for (name, value) in &params {
            q = bind(q, name, value);
        }
        self.graph.run(q).await.map_err(io_err)
    }

    async fn get_node(&self, label: &str, urn: &str) -> Result<Option<NodeRecord>> {
        let text = format!(
            "MATCH (e:{label} {{urn:$urn}}) RETURN properties(e) AS props, \
             coalesce(e.lastUpdated, 0) AS updated"
        );
        let mut rows = self
            .graph
            .execute(query(&text).param("urn", urn))
            .await
            .map_err(io_err)?;
        if let Ok(Some(row)) = rows.next().await {
            let mut props: JsonMap = row.get("props").unwrap_or_default();
            let updated_at_ms: i64 = row.get("updated").unwrap_or(0);
            props.remove("urn");
            props.remove("lastUpdated");
            Ok(Some(NodeRecord {
                label: label.to_string(),
                urn: urn.to_string(),
                props,
                updated_at_ms,
            }))
        } else {
            Ok(None)
        }
    }

    async fn node_exists(&self, urn: &str) -> Result<bool> {
        let mut rows = self
            .graph
            .execute(query("MATCH (e {urn:$urn}) RETURN count(e) AS n").param("urn", urn))
            .await
            .map_err(io_err)?;
        if let Ok(Some(row)) = rows.next().await {
            let n: i64 = row.get("n").unwrap_or(0);
            Ok(n > 0)
        } else {
            Ok(false)
        }
    }

    async fn delete_node(&self, label: &str, urn: &str) -> Result<bool> {
        if self.get_node(label, urn).await?.is_none() {
            return Ok(false);
        }
        // Aspect records hang off HAS_ASPECT; remove them with the owner so
        // cascade removes exactly the node, its aspects, and incident edges.
        let text = format!(
            "MATCH (e:{label} {{urn:$urn}}) \
             OPTIONAL MATCH (e)-[:HAS_ASPECT]->(a:Aspect) \
             DETACH DELETE a, e"
        );
        self.graph
            .run(query(&text).param("urn", urn))
            .await
            .map_err(io_err)?;
        Ok(true)
    }

    async fn count_dependents(&self, urn: &str) -> Result<DependentCounts> {
        let text = "MATCH (e {urn:$urn}) \
             OPTIONAL MATCH (e)-[ha:HAS_ASPECT]->(:Aspect) \
             WITH e, count(DISTINCT ha.name) AS aspects \
             OPTIONAL MATCH (other)-[incoming]->(e) \
             WHERE NOT other:Aspect \
             RETURN aspects, count(incoming) AS incoming";
        let mut rows = self
            .graph
            .execute(query(text).param("urn", urn))
            .await
            .map_err(io_err)?;
        if let Ok(Some(row)) = rows.next().await {
            let aspects: i64 = row.get("aspects").unwrap_or(0);
            let incoming: i64 = row.get("incoming").unwrap_or(0);
            Ok(DependentCounts {
                aspects: aspects.max(0) as usize,
                incoming_edges: incoming.max(0) as usize,
            })
        } else {
            Ok(DependentCounts::default())
        }
    }

    async fn insert_versioned_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        now_ms: i64,
    ) -> Result<u64> {
        if self.get_node(label, urn).await?.is_none() {
            return Err(CatalogError::NotFound {
                kind: label.to_string(),
                urn: urn.to_string(),
            });
        }

        let max_text = format!(
            "MATCH (e:{label} {{urn:$urn}})-[:HAS_ASPECT {{name:$an}}]->(a:Aspect:Versioned) \
             RETURN coalesce(max(a.version), 0) AS maxv"
        );
        let mut rows = self
            .graph
            .execute(query(&max_text).param("urn", urn).param("an", aspect_name))
            .await
            .map_err(io_err)?;
        let max_version: i64 = match rows.next().await {
            Ok(Some(row)) => row.get("maxv").unwrap_or(0),
            _ => 0,
        };
        let new_version = (max_version + 1) as u64;
        let aspect_id = format!("{urn}|{aspect_name}|{new_version}");

        // Flip + insert in one transaction. A concurrent writer that chose
        // the same version trips the aspect identity constraint; the caller
        // retries and observes the new max.
        let mut txn = self.graph.start_txn().await.map_err(io_err)?;
        let flip = format!(
            "MATCH (e:{label} {{urn:$urn}})-[r:HAS_ASPECT {{name:$an, kind:'versioned', latest:true}}]->(:Aspect) \
             SET r.latest = false"
        );
        let create = format!(
            "MATCH (e:{label} {{urn:$urn}}) \
             CREATE (a:Aspect:Versioned {{id:$id, name:$an, version:$ver, kind:'versioned', json:$json, createdAt:$now}}) \
             CREATE (e)-[:HAS_ASPECT {{name:$an, version:$ver, latest:true, kind:'versioned'}}]->(a)"
        );
        let outcome = txn
            .run_queries([
                query(&flip).param("urn", urn).param("an", aspect_name),
                query(&create)
                    .param("urn", urn)
                    .param("an", aspect_name)
                    .param("id", aspect_id.as_str())
                    .param("ver", new_version as i64)
                    .param("json", payload_json(payload)?.as_str())
                    .param("now", now_ms),
            ])
            .await;
        match outcome {
            Ok(()) => {
                txn.commit()
                    .await
                    .map_err(|e| map_store_error(e, urn, aspect_name))?;
                Ok(new_version)
            }
            Err(e) => Err(map_store_error(e, urn, aspect_name)),
        }
    }

    async fn append_timeseries_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        timestamp_ms: i64,
        now_ms: i64,
    ) -> Result<()> {
        if self.get_node(label, urn).await?.is_none() {
            return Err(CatalogError::NotFound {
                kind: label.to_string(),
                urn: urn.to_string(),
            });
        }
        // The uuid suffix keeps identical-timestamp siblings clear of the
        // aspect identity constraint.
        let aspect_id = format!(
            "{urn}|{aspect_name}|{timestamp_ms}|{}",
            uuid::Uuid::new_v4()
        );
        let text = format!(
            "MATCH (e:{label} {{urn:$urn}}) \
             CREATE (a:Aspect:Timeseries {{id:$id, name:$an, ts:$ts, kind:'timeseries', json:$json, createdAt:$now}}) \
             CREATE (e)-[:HAS_ASPECT {{name:$an, ts:$ts, kind:'timeseries'}}]->(a)"
        );
        self.graph
            .run(
                query(&text)
                    .param("urn", urn)
                    .param("an", aspect_name)
                    .param("id", aspect_id.as_str())
                    .param("ts", timestamp_ms)
                    .param("json", payload_json(payload)?.as_str())
                    .param("now", now_ms),
            )
            .await
            .map_err(io_err)
    }

    async fn latest_versioned_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
    ) -> Result<Option<VersionedAspectRecord>> {
        let text = format!(
            "MATCH (e:{label} {{urn:$urn}})-[r:HAS_ASPECT {{name:$an, kind:'versioned', latest:true}}]->(a:Aspect:Versioned) \
             RETURN a.version AS version, a.json AS payload, a.createdAt AS created"
        );
        let mut rows = self
            .graph
            .execute(query(&text).param("urn", urn).param("an", aspect_name))
            .await
            .map_err(io_err)?;
        if let Ok(Some(row)) = rows.next().await {
            let version: i64 = row.get("version").unwrap_or(0);
            let payload: Option<String> = row.get("payload").ok();
            let created_at_ms: i64 = row.get("created").unwrap_or(0);
            Ok(Some(VersionedAspectRecord {
                name: aspect_name.to_string(),
                version: version.max(0) as u64,
                payload: parse_payload(payload),
                created_at_ms,
                latest: true,
            }))
        } else {
            Ok(None)
        }
    }

    async fn timeseries_range(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TimeseriesAspectRecord>> {
        let text = format!(
            "MATCH (e:{label} {{urn:$urn}})-[:HAS_ASPECT {{name:$an, kind:'timeseries'}}]->(a:Aspect:Timeseries) \
             WHERE a.ts >= $from AND a.ts <= $to \
             RETURN a.ts AS ts, a.json AS payload, a.createdAt AS created \
             ORDER BY a.ts DESC LIMIT $limit"
        );
        let mut rows = self
            .graph
            .execute(
                query(&text)
                    .param("urn", urn)
                    .param("an", aspect_name)
                    .param("from", from_ms.unwrap_or(i64::MIN))
                    .param("to", to_ms.unwrap_or(i64::MAX))
                    .param("limit", limit as i64),
            )
            .await
            .map_err(io_err)?;
        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let timestamp_ms: i64 = row.get("ts").unwrap_or(0);
            let payload: Option<String> = row.get("payload").ok();
            let created_at_ms: i64 = row.get("created").unwrap_or(0);
            records.push(TimeseriesAspectRecord {
                name: aspect_name.to_string(),
                timestamp_ms,
                payload: parse_payload(payload),
                created_at_ms,
            });
        }
        Ok(records)
    }

    async fn delete_aspect(&self, label: &str, urn: &str, aspect_name: &str) -> Result<usize> {
        let text = format!(
            "MATCH (e:{label} {{urn:$urn}})-[r:HAS_ASPECT {{name:$an}}]->(a:Aspect) \
             DELETE r, a \
             RETURN count(*) AS removed"
        );
        let mut rows = self
            .graph
            .execute(query(&text).param("urn", urn).param("an", aspect_name))
            .await
            .map_err(io_err)?;
        if let Ok(Some(row)) = rows.next().await {
            let removed: i64 = row.get("removed").unwrap_or(0);
            Ok(removed.max(0) as usize)
        } else {
            Ok(0)
        }
    }

    async fn merge_relationship(&self, spec: &EdgeMergeSpec) -> Result<MergeOutcome> {
        // Discriminator properties are part of the MERGE pattern so they
        // participate in edge identity.
        let mut disc_fragments = Vec::new();
        let mut disc_params: Vec<(String, Value)> = Vec::new();
        for (i, key) in spec.discriminators.iter().enumerate() {
            let param = format!("d{i}");
            disc_fragments.push(format!("{}: ${param}", quoted(key)));
            disc_params.push((
                param,
                spec.props.get(key).cloned().unwrap_or(Value::Null),
            ));
        }
        let disc_pattern = if disc_fragments.is_empty() {
            String::new()
        } else {
            format!(" {{{}}}", disc_fragments.join(", "))
        };

        // Scalars overwrite (last writer wins); arrays union in place.
        let mut set_fragments = vec!["r.createdAt = coalesce(r.createdAt, $now)".to_string()];
        let mut prop_params: Vec<(String, Value)> = Vec::new();
        for (i, (key, value)) in spec.props.iter().enumerate() {
            let param = format!("p{i}");
            let target = format!("r.{}", quoted(key));
            if value.is_array() {
                set_fragments.push(format!(
                    "{target} = coalesce({target}, []) + [x IN ${param} WHERE NOT x IN coalesce({target}, [])]"
                ));
            } else {
                set_fragments.push(format!("{target} = ${param}"));
            }
            prop_params.push((param, value.clone()));
        }
        if let Some(via) = &spec.via {
            set_fragments.push("r.via = $via".to_string());
            prop_params.push(("via".to_string(), Value::String(via.clone())));
        }

        let text = format!(
            "MATCH (a:{src} {{urn:$src_urn}}) MATCH (b:{dst} {{urn:$dst_urn}}) \
             MERGE (a)-[r:{rel}{disc_pattern}]->(b) \
             WITH r, (CASE WHEN r.createdAt IS NULL THEN 1 ELSE 0 END) AS fresh \
             SET {set} \
             RETURN fresh",
            src = spec.src_label,
            dst = spec.dst_label,
            rel = spec.rel_type,
            set = set_fragments.join(", "),
        );
        let mut q = query(&text)
            .param("src_urn", spec.src_urn.as_str())
            .param("dst_urn", spec.dst_urn.as_str())
            .param("now", chrono::Utc::now().timestamp_millis());
        for (name, value) in disc_params.iter().chain(prop_params.iter()) {
            q = bind(q, name, value);
        }

        let mut rows = self.graph.execute(q).await.map_err(io_err)?;
        match rows.next().await {
            Ok(Some(row)) => {
                let fresh: i64 = row.get("fresh").unwrap_or(0);
                Ok(if fresh == 1 {
                    MergeOutcome::Created
                } else {
                    MergeOutcome::Updated
                })
            }
            // MERGE matched nothing: one of the endpoints is missing.
            _ => Err(CatalogError::NotFound {
                kind: spec.dst_label.clone(),
                urn: spec.dst_urn.clone(),
            }),
        }
    }

    async fn relationships_from(&self, src_urn: &str) -> Result<Vec<EdgeRecord>> {
        self.relationship_query(
            "MATCH (a {urn:$urn})-[r]->(b) WHERE NOT b:Aspect \
             RETURN type(r) AS rel, a.urn AS src, b.urn AS dst, properties(r) AS props",
            src_urn,
        )
        .await
    }

    async fn relationships_to(&self, dst_urn: &str) -> Result<Vec<EdgeRecord>> {
        self.relationship_query(
            "MATCH (a)-[r]->(b {urn:$urn}) WHERE NOT a:Aspect \
             RETURN type(r) AS rel, a.urn AS src, b.urn AS dst, properties(r) AS props",
            dst_urn,
        )
        .await
    }
}

impl Neo4jGraphStore {
    async fn relationship_query(&self, text: &str, urn: &str) -> Result<Vec<EdgeRecord>> {
        let mut rows = self
            .graph
            .execute(query(text).param("urn", urn))
            .await
            .map_err(io_err)?;
        let mut edges = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let rel_type: String = row.get("rel").unwrap_or_default();
            let src_urn: String = row.get("src").unwrap_or_default();
            let dst_urn: String = row.get("dst").unwrap_or_default();
            let mut props: JsonMap = row.get("props").unwrap_or_default();
            let created_at_ms = props
                .remove("createdAt")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let via = props
                .remove("via")
                .and_then(|v| v.as_str().map(str::to_string));
            edges.push(EdgeRecord {
                src_urn,
                rel_type,
                dst_urn,
                props,
                created_at_ms,
                via,
            });
        }
        Ok(edges)
    }
}
