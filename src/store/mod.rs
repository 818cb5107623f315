//! Narrow persistence surface over the property-graph store.
//!
//! Every mutation in the system funnels through the [`GraphStore`] trait.
//! Each method is individually atomic; the multi-step versioned-aspect
//! algorithm is a single call so each backend can make it transactional in
//! its own way. Two backends: `MemoryGraphStore` for tests and POC work,
//! `Neo4jGraphStore` for production.
//!
//! Persisted layout (both backends observe it): entity label = entity type
//! name, key = `urn`; aspect records are `Aspect` nodes with a secondary
//! `Versioned`/`Timeseries` label, attached via a `HAS_ASPECT` edge carrying
//! `{name, version|timestamp, latest, kind}`; payloads are JSON documents.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::registry::Registry;

mod memory;
mod neo4j;

pub use memory::MemoryGraphStore;
pub use neo4j::Neo4jGraphStore;

pub type JsonMap = serde_json::Map<String, Value>;

/// An entity node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub label: String,
    pub urn: String,
    pub props: JsonMap,
    pub updated_at_ms: i64,
}

/// One committed version of a versioned aspect. Immutable after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedAspectRecord {
    pub name: String,
    pub version: u64,
    pub payload: Value,
    pub created_at_ms: i64,
    pub latest: bool,
}

/// One time-series row. Append-only; identical timestamps may coexist.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesAspectRecord {
    pub name: String,
    pub timestamp_ms: i64,
    pub payload: Value,
    pub created_at_ms: i64,
}

/// A relationship edge between two entity URNs.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub src_urn: String,
    pub rel_type: String,
    pub dst_urn: String,
    pub props: JsonMap,
    pub created_at_ms: i64,
    /// Aspect name that created the edge, when rule-driven.
    pub via: Option<String>,
}

/// Everything needed to merge one edge idempotently.
#[derive(Debug, Clone)]
pub struct EdgeMergeSpec {
    pub src_label: String,
    pub src_urn: String,
    pub rel_type: String,
    pub dst_label: String,
    pub dst_urn: String,
    pub props: JsonMap,
    /// Property keys participating in edge identity besides the endpoints
    /// and type.
    pub discriminators: Vec<String>,
    pub via: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
}

/// Live dependents of an entity, consulted by non-cascade delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependentCounts {
    pub aspects: usize,
    pub incoming_edges: usize,
}

impl DependentCounts {
    pub fn is_empty(&self) -> bool {
        self.aspects == 0 && self.incoming_edges == 0
    }
}

/// The narrow, transactional persistence API.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create unique constraints and indices required by the registry:
    /// `(label, urn)` unique per entity label, the aspect identity
    /// constraint backing version uniqueness, and a discriminator index per
    /// declared relationship type. Idempotent.
    async fn ensure_constraints(&self, registry: &Registry) -> Result<()>;

    // ── Nodes ──

    /// MERGE by `(label, urn)`; sets props on create, last-writer-wins on
    /// re-upsert.
    async fn upsert_node(&self, label: &str, urn: &str, props: &JsonMap, now_ms: i64)
        -> Result<()>;

    async fn get_node(&self, label: &str, urn: &str) -> Result<Option<NodeRecord>>;

    async fn node_exists(&self, urn: &str) -> Result<bool>;

    /// Detach-delete the node and everything hanging off it. Returns whether
    /// the node existed.
    async fn delete_node(&self, label: &str, urn: &str) -> Result<bool>;

    async fn count_dependents(&self, urn: &str) -> Result<DependentCounts>;

    // ── Aspects ──

    /// Atomically compute `max_version + 1`, clear the current latest flag,
    /// and insert the new record. Returns the new version. Concurrent
    /// callers race on the `(urn, aspect_name, version)` uniqueness
    /// constraint; the loser gets `CatalogError::StoreConflict`.
    async fn insert_versioned_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        now_ms: i64,
    ) -> Result<u64>;

    /// Unconditional append. Identical timestamps are admitted as siblings.
    async fn append_timeseries_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        timestamp_ms: i64,
        now_ms: i64,
    ) -> Result<()>;

    async fn latest_versioned_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
    ) -> Result<Option<VersionedAspectRecord>>;

    /// Rows in `[from_ms, to_ms]` (either bound optional), newest first,
    /// capped at `limit`.
    async fn timeseries_range(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TimeseriesAspectRecord>>;

    /// Remove all versions or all time-series rows for `(urn, aspect_name)`.
    /// The owning node is preserved. Returns removed record count.
    async fn delete_aspect(&self, label: &str, urn: &str, aspect_name: &str) -> Result<usize>;

    // ── Relationships ──

    /// Idempotent merge keyed on `(src_urn, type, dst_urn)` plus
    /// discriminator values. On re-merge, properties combine
    /// last-writer-wins for scalars and union for arrays.
    async fn merge_relationship(&self, spec: &EdgeMergeSpec) -> Result<MergeOutcome>;

    /// All outgoing edges of a node. Read helper for rule evaluation
    /// checks and tests.
    async fn relationships_from(&self, src_urn: &str) -> Result<Vec<EdgeRecord>>;

    /// All incoming edges of a node.
    async fn relationships_to(&self, dst_urn: &str) -> Result<Vec<EdgeRecord>>;
}

/// Merge policy for relationship properties: last-writer-wins on scalar
/// fields, union (by value equality, order preserved) on array fields.
pub fn merge_edge_props(existing: &mut JsonMap, incoming: &JsonMap) {
    for (key, value) in incoming {
        match (existing.get_mut(key), value) {
            (Some(Value::Array(have)), Value::Array(new)) => {
                for item in new {
                    if !have.contains(item) {
                        have.push(item.clone());
                    }
                }
            }
            _ => {
                existing.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn scalar_props_are_last_writer_wins() {
        let mut existing = map(json!({"type": "DATA_OWNER", "weight": 1}));
        merge_edge_props(&mut existing, &map(json!({"weight": 2})));
        assert_eq!(existing.get("weight"), Some(&json!(2)));
        assert_eq!(existing.get("type"), Some(&json!("DATA_OWNER")));
    }

    #[test]
    fn array_props_union_without_duplicates() {
        let mut existing = map(json!({"tags": ["a", "b"]}));
        merge_edge_props(&mut existing, &map(json!({"tags": ["b", "c"]})));
        assert_eq!(existing.get("tags"), Some(&json!(["a", "b", "c"])));
    }

    #[test]
    fn scalar_over_array_replaces() {
        let mut existing = map(json!({"tags": ["a"]}));
        merge_edge_props(&mut existing, &map(json!({"tags": "solo"})));
        assert_eq!(existing.get("tags"), Some(&json!("solo")));
    }
}
