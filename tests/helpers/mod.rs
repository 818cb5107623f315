//! Shared fixtures for write-core integration tests.

use std::sync::Arc;

use metagraph::{Catalog, MemoryGraphStore, Registry, RetryPolicy, StoreConfig};
use serde_json::Value;

/// A registry exercising every write-core feature: versioned and
/// time-series aspects, an ownership relationship rule with auto-creation,
/// and lineage transformation templates.
pub const REGISTRY_YAML: &str = r#"
entities:
  Dataset:
    identifying_params: [platform, name, env]
    optional_params: [versionId]
    urn_template: "urn:li:dataset:(urn:li:dataPlatform:{platform},{name},{env})"
    aspects:
      datasetProperties: versioned
      schemaMetadata: versioned
      ownership: versioned
      datasetProfile: timeseries
  CorpUser:
    identifying_params: [username]
    urn_template: "urn:li:corpuser:{username}"
  Column:
    identifying_params: [dataset_urn, field_path]
    urn_template: "urn:li:column:({dataset_urn},{field_path})"
    aspects:
      transformation: versioned
aspects:
  datasetProperties:
    type: versioned
    properties: [description, customProperties]
    required: [description]
  schemaMetadata:
    type: versioned
    properties: [schemaName, fields]
  ownership:
    type: versioned
    properties: [owners]
    required: [owners]
  datasetProfile:
    type: timeseries
    properties: [rowCount, size]
  transformation:
    type: versioned
    properties: [transformation_type, input_columns, description]
    required: [transformation_type, input_columns]
relationship_rules:
  - trigger: ownership
    extract: { dst: "owners[].owner", props: { type: "owners[].type" } }
    source_selector: { kind: owning }
    destination_selector: { kind: from_urn, entity: CorpUser }
    edge: { type: OWNED_BY, discriminators: [type] }
    auto_create_missing: true
lineage_config:
  transformation_templates:
    default:
      description_template: "Derived from {input_columns} via {transformation_type}"
      relationship_properties:
        subtype: "{transformation_type}"
    patterns:
      HASHING:
        relationship_properties:
          subtype: "HASHING"
          masking: "true"
"#;

pub const DATASET_URN: &str =
    "urn:li:dataset:(urn:li:dataPlatform:mysql,test_db.test_table,PROD)";

pub async fn bootstrap() -> (Catalog, Arc<MemoryGraphStore>) {
    let registry = Registry::from_str(REGISTRY_YAML).expect("fixture registry is valid");
    let store = Arc::new(MemoryGraphStore::new());
    let catalog = Catalog::bootstrap(
        registry,
        store.clone(),
        &StoreConfig::default(),
        RetryPolicy::default(),
    )
    .await
    .expect("bootstrap succeeds");
    (catalog, store)
}

pub fn json_map(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
