//! In-memory `GraphStore` for tests and POC work.
//!
//! State lives behind one `tokio::sync::RwLock`, so every trait method is
//! trivially atomic: the multi-step versioned-aspect algorithm runs under a
//! single write guard and can never observe a torn intermediate state.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    merge_edge_props, DependentCounts, EdgeMergeSpec, EdgeRecord, GraphStore, JsonMap,
    MergeOutcome, NodeRecord, TimeseriesAspectRecord, VersionedAspectRecord,
};
use crate::error::{CatalogError, Result};
use crate::registry::Registry;

/// Edge identity: endpoints + type + discriminator values (sorted by key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EdgeKey {
    src_urn: String,
    rel_type: String,
    dst_urn: String,
    discriminators: Vec<(String, String)>,
}

impl EdgeKey {
    fn new(spec: &EdgeMergeSpec) -> Self {
        let mut discriminators: Vec<(String, String)> = spec
            .discriminators
            .iter()
            .map(|key| {
                let value = spec
                    .props
                    .get(key)
                    .map(value_fingerprint)
                    .unwrap_or_default();
                (key.clone(), value)
            })
            .collect();
        discriminators.sort();
        Self {
            src_urn: spec.src_urn.clone(),
            rel_type: spec.rel_type.clone(),
            dst_urn: spec.dst_urn.clone(),
            discriminators,
        }
    }
}

/// Stable string form of a discriminator value.
fn value_fingerprint(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Inner {
    /// URNs are globally unique, so nodes key on urn alone; the label is
    /// checked on access.
    nodes: HashMap<String, NodeRecord>,
    versioned: HashMap<(String, String), Vec<VersionedAspectRecord>>,
    timeseries: HashMap<(String, String), Vec<TimeseriesAspectRecord>>,
    edges: BTreeMap<EdgeKey, EdgeRecord>,
}

pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Total node count. Test helper.
    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    /// Total edge count. Test helper.
    pub async fn edge_count(&self) -> usize {
        self.inner.read().await.edges.len()
    }

    /// Every stored version for `(urn, aspect)`, oldest first. Test helper.
    pub async fn all_versions(&self, urn: &str, aspect_name: &str) -> Vec<VersionedAspectRecord> {
        let r = self.inner.read().await;
        r.versioned
            .get(&(urn.to_string(), aspect_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(label: &str, urn: &str) -> CatalogError {
    CatalogError::NotFound {
        kind: label.to_string(),
        urn: urn.to_string(),
    }
}

impl Inner {
    fn node_checked(&self, label: &str, urn: &str) -> Result<&NodeRecord> {
        self.nodes
            .get(urn)
            .filter(|n| n.label == label)
            .ok_or_else(|| not_found(label, urn))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_constraints(&self, _registry: &Registry) -> Result<()> {
        // Uniqueness falls out of the map keys; nothing to install.
        Ok(())
    }

    async fn upsert_node(
        &self,
        label: &str,
        urn: &str,
        props: &JsonMap,
        now_ms: i64,
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        match w.nodes.get_mut(urn) {
            Some(node) => {
                // Non-key params are last-writer-wins at commit time.
                for (key, value) in props {
                    node.props.insert(key.clone(), value.clone());
                }
                node.updated_at_ms = now_ms;
            }
            None => {
                w.nodes.insert(
                    urn.to_string(),
                    NodeRecord {
                        label: label.to_string(),
                        urn: urn.to_string(),
                        props: props.clone(),
                        updated_at_ms: now_ms,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_node(&self, label: &str, urn: &str) -> Result<Option<NodeRecord>> {
        let r = self.inner.read().await;
        Ok(r.nodes.get(urn).filter(|n| n.label == label).cloned())
    }

    async fn node_exists(&self, urn: &str) -> Result<bool> {
        let r = self.inner.read().await;
        Ok(r.nodes.contains_key(urn))
    }

    async fn delete_node(&self, label: &str, urn: &str) -> Result<bool> {
        let mut w = self.inner.write().await;
        let existed = w.nodes.get(urn).is_some_and(|n| n.label == label);
        if !existed {
            return Ok(false);
        }
        w.nodes.remove(urn);
        w.versioned.retain(|(owner, _), _| owner != urn);
        w.timeseries.retain(|(owner, _), _| owner != urn);
        w.edges
            .retain(|key, _| key.src_urn != urn && key.dst_urn != urn);
        Ok(true)
    }

    async fn count_dependents(&self, urn: &str) -> Result<DependentCounts> {
        let r = self.inner.read().await;
        let aspects = r
            .versioned
            .iter()
            .filter(|((owner, _), records)| owner == urn && !records.is_empty())
            .count()
            + r.timeseries
                .iter()
                .filter(|((owner, _), records)| owner == urn && !records.is_empty())
                .count();
        let incoming_edges = r.edges.keys().filter(|key| key.dst_urn == urn).count();
        Ok(DependentCounts {
            aspects,
            incoming_edges,
        })
    }

    async fn insert_versioned_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        now_ms: i64,
    ) -> Result<u64> {
        let mut w = self.inner.write().await;
        w.node_checked(label, urn)?;

        let records = w
            .versioned
            .entry((urn.to_string(), aspect_name.to_string()))
            .or_default();
        let new_version = records.last().map(|r| r.version + 1).unwrap_or(1);
        for record in records.iter_mut() {
            record.latest = false;
        }
        records.push(VersionedAspectRecord {
            name: aspect_name.to_string(),
            version: new_version,
            payload: payload.clone(),
            created_at_ms: now_ms,
            latest: true,
        });
        Ok(new_version)
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
        let mut w = self.inner.write().await;
        w.node_checked(label, urn)?;
        w.timeseries
            .entry((urn.to_string(), aspect_name.to_string()))
            .or_default()
            .push(TimeseriesAspectRecord {
                name: aspect_name.to_string(),
                timestamp_ms,
                payload: payload.clone(),
                created_at_ms: now_ms,
            });
        Ok(())
    }

    async fn latest_versioned_aspect(
        &self,
        label: &str,
        urn: &str,
        aspect_name: &str,
    ) -> Result<Option<VersionedAspectRecord>> {
        let r = self.inner.read().await;
        if r.nodes.get(urn).filter(|n| n.label == label).is_none() {
            return Ok(None);
        }
        Ok(r.versioned
            .get(&(urn.to_string(), aspect_name.to_string()))
            .and_then(|records| records.iter().find(|rec| rec.latest))
            .cloned())
    }

    async fn timeseries_range(
        &self,
        _label: &str,
        urn: &str,
        aspect_name: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TimeseriesAspectRecord>> {
        let r = self.inner.read().await;
        let mut rows: Vec<TimeseriesAspectRecord> = r
            .timeseries
            .get(&(urn.to_string(), aspect_name.to_string()))
            .map(|records| {
                records
                    .iter()
                    .filter(|rec| from_ms.is_none_or(|from| rec.timestamp_ms >= from))
                    .filter(|rec| to_ms.is_none_or(|to| rec.timestamp_ms <= to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete_aspect(&self, _label: &str, urn: &str, aspect_name: &str) -> Result<usize> {
        let mut w = self.inner.write().await;
        let key = (urn.to_string(), aspect_name.to_string());
        let removed = w.versioned.remove(&key).map(|v| v.len()).unwrap_or(0)
            + w.timeseries.remove(&key).map(|v| v.len()).unwrap_or(0);
        Ok(removed)
    }

    async fn merge_relationship(&self, spec: &EdgeMergeSpec) -> Result<MergeOutcome> {
        let mut w = self.inner.write().await;
        w.node_checked(&spec.src_label, &spec.src_urn)?;
        w.node_checked(&spec.dst_label, &spec.dst_urn)?;

        let key = EdgeKey::new(spec);
        match w.edges.get_mut(&key) {
            Some(edge) => {
                merge_edge_props(&mut edge.props, &spec.props);
                Ok(MergeOutcome::Updated)
            }
            None => {
                w.edges.insert(
                    key,
                    EdgeRecord {
                        src_urn: spec.src_urn.clone(),
                        rel_type: spec.rel_type.clone(),
                        dst_urn: spec.dst_urn.clone(),
                        props: spec.props.clone(),
                        created_at_ms: chrono::Utc::now().timestamp_millis(),
                        via: spec.via.clone(),
                    },
                );
                Ok(MergeOutcome::Created)
            }
        }
    }

    async fn relationships_from(&self, src_urn: &str) -> Result<Vec<EdgeRecord>> {
        let r = self.inner.read().await;
        Ok(r.edges
            .iter()
            .filter(|(key, _)| key.src_urn == src_urn)
            .map(|(_, edge)| edge.clone())
            .collect())
    }

    async fn relationships_to(&self, dst_urn: &str) -> Result<Vec<EdgeRecord>> {
        let r = self.inner.read().await;
        Ok(r.edges
            .iter()
            .filter(|(key, _)| key.dst_urn == dst_urn)
            .map(|(_, edge)| edge.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn store_with_node(label: &str, urn: &str) -> MemoryGraphStore {
        let store = MemoryGraphStore::new();
        store
            .upsert_node(label, urn, &props(json!({})), 1_000)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_node_is_idempotent_and_lww() {
        let store = MemoryGraphStore::new();
        store
            .upsert_node("Dataset", "urn:x", &props(json!({"env": "DEV"})), 1)
            .await
            .unwrap();
        store
            .upsert_node("Dataset", "urn:x", &props(json!({"env": "PROD"})), 2)
            .await
            .unwrap();

        assert_eq!(store.node_count().await, 1);
        let node = store.get_node("Dataset", "urn:x").await.unwrap().unwrap();
        assert_eq!(node.props.get("env"), Some(&json!("PROD")));
        assert_eq!(node.updated_at_ms, 2);
    }

    #[tokio::test]
    async fn versioned_aspects_are_monotone_with_single_latest() {
        let store = store_with_node("Dataset", "urn:x").await;
        for i in 1..=3u64 {
            let v = store
                .insert_versioned_aspect("Dataset", "urn:x", "props", &json!({"i": i}), 10)
                .await
                .unwrap();
            assert_eq!(v, i);
        }
        let all = store.all_versions("urn:x", "props").await;
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|r| r.latest).count(), 1);
        let latest = store
            .latest_versioned_aspect("Dataset", "urn:x", "props")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.payload, json!({"i": 3}));
    }

    #[tokio::test]
    async fn versioned_aspect_requires_owning_node() {
        let store = MemoryGraphStore::new();
        let err = store
            .insert_versioned_aspect("Dataset", "urn:ghost", "props", &json!({}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn timeseries_siblings_with_identical_timestamps() {
        let store = store_with_node("Dataset", "urn:x").await;
        for _ in 0..2 {
            store
                .append_timeseries_aspect("Dataset", "urn:x", "profile", &json!({}), 500, 1)
                .await
                .unwrap();
        }
        let rows = store
            .timeseries_range("Dataset", "urn:x", "profile", None, None, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn timeseries_range_filters_and_orders_desc() {
        let store = store_with_node("Dataset", "urn:x").await;
        for ts in [100, 200, 300, 400] {
            store
                .append_timeseries_aspect("Dataset", "urn:x", "profile", &json!({"ts": ts}), ts, 1)
                .await
                .unwrap();
        }
        let rows = store
            .timeseries_range("Dataset", "urn:x", "profile", Some(150), Some(350), 10)
            .await
            .unwrap();
        let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, vec![300, 200]);
    }

    #[tokio::test]
    async fn merge_relationship_is_idempotent() {
        let store = store_with_node("Dataset", "urn:a").await;
        store
            .upsert_node("CorpUser", "urn:b", &props(json!({})), 1)
            .await
            .unwrap();

        let spec = EdgeMergeSpec {
            src_label: "Dataset".into(),
            src_urn: "urn:a".into(),
            rel_type: "OWNED_BY".into(),
            dst_label: "CorpUser".into(),
            dst_urn: "urn:b".into(),
            props: props(json!({"type": "DATA_OWNER"})),
            discriminators: vec!["type".into()],
            via: Some("ownership".into()),
        };
        assert_eq!(
            store.merge_relationship(&spec).await.unwrap(),
            MergeOutcome::Created
        );
        assert_eq!(
            store.merge_relationship(&spec).await.unwrap(),
            MergeOutcome::Updated
        );
        assert_eq!(store.edge_count().await, 1);
    }

    #[tokio::test]
    async fn discriminators_split_edge_identity() {
        let store = store_with_node("Dataset", "urn:a").await;
        store
            .upsert_node("CorpUser", "urn:b", &props(json!({})), 1)
            .await
            .unwrap();
        for owner_type in ["DATA_OWNER", "STEWARD"] {
            let spec = EdgeMergeSpec {
                src_label: "Dataset".into(),
                src_urn: "urn:a".into(),
                rel_type: "OWNED_BY".into(),
                dst_label: "CorpUser".into(),
                dst_urn: "urn:b".into(),
                props: props(json!({"type": owner_type})),
                discriminators: vec!["type".into()],
                via: None,
            };
            store.merge_relationship(&spec).await.unwrap();
        }
        assert_eq!(store.edge_count().await, 2);
    }

    #[tokio::test]
    async fn delete_node_cascades_aspects_and_edges() {
        let store = store_with_node("Dataset", "urn:a").await;
        store
            .upsert_node("CorpUser", "urn:b", &props(json!({})), 1)
            .await
            .unwrap();
        store
            .insert_versioned_aspect("Dataset", "urn:a", "props", &json!({}), 1)
            .await
            .unwrap();
        store
            .append_timeseries_aspect("Dataset", "urn:a", "profile", &json!({}), 1, 1)
            .await
            .unwrap();
        store
            .merge_relationship(&EdgeMergeSpec {
                src_label: "Dataset".into(),
                src_urn: "urn:a".into(),
                rel_type: "OWNED_BY".into(),
                dst_label: "CorpUser".into(),
                dst_urn: "urn:b".into(),
                props: JsonMap::new(),
                discriminators: vec![],
                via: None,
            })
            .await
            .unwrap();

        assert!(store.delete_node("Dataset", "urn:a").await.unwrap());

        assert!(!store.node_exists("urn:a").await.unwrap());
        assert!(store.all_versions("urn:a", "props").await.is_empty());
        assert_eq!(store.edge_count().await, 0);
        // The other node survives untouched.
        assert!(store.node_exists("urn:b").await.unwrap());
    }

    #[tokio::test]
    async fn delete_aspect_preserves_owner() {
        let store = store_with_node("Dataset", "urn:a").await;
        for _ in 0..3 {
            store
                .insert_versioned_aspect("Dataset", "urn:a", "props", &json!({}), 1)
                .await
                .unwrap();
        }
        let removed = store.delete_aspect("Dataset", "urn:a", "props").await.unwrap();
        assert_eq!(removed, 3);
        assert!(store.node_exists("urn:a").await.unwrap());
        assert!(store
            .latest_versioned_aspect("Dataset", "urn:a", "props")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn dependent_counts_track_aspects_and_incoming_edges() {
        let store = store_with_node("Dataset", "urn:a").await;
        store
            .upsert_node("CorpUser", "urn:b", &props(json!({})), 1)
            .await
            .unwrap();
        store
            .insert_versioned_aspect("CorpUser", "urn:b", "props", &json!({}), 1)
            .await
            .unwrap();
        store
            .merge_relationship(&EdgeMergeSpec {
                src_label: "Dataset".into(),
                src_urn: "urn:a".into(),
                rel_type: "OWNED_BY".into(),
                dst_label: "CorpUser".into(),
                dst_urn: "urn:b".into(),
                props: JsonMap::new(),
                discriminators: vec![],
                via: None,
            })
            .await
            .unwrap();

        let counts = store.count_dependents("urn:b").await.unwrap();
        assert_eq!(counts.aspects, 1);
        assert_eq!(counts.incoming_edges, 1);
        assert!(store.count_dependents("urn:a").await.unwrap().is_empty());
    }
}
