//! The Graph Writer: the only component that mutates the store.
//!
//! Validates before any transaction is opened, then delegates to the
//! [`GraphStore`] backend. Retryable conflicts (the versioned-aspect
//! uniqueness race, transient store failures) are retried with bounded
//! jittered backoff; everything else surfaces immediately.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::aspect::AspectValidator;
use crate::config::RetryPolicy;
use crate::error::{CatalogError, Result, ValidationError};
use crate::registry::{AspectKind, Registry};
use crate::store::{
    DependentCounts, EdgeMergeSpec, GraphStore, JsonMap, MergeOutcome, NodeRecord,
    TimeseriesAspectRecord, VersionedAspectRecord,
};

pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    registry: Arc<Registry>,
    validator: AspectValidator,
    retry: RetryPolicy,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<Registry>, retry: RetryPolicy) -> Self {
        let validator = AspectValidator::new(registry.clone());
        Self {
            store,
            registry,
            validator,
            retry,
        }
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn require_entity_type(&self, entity_type: &str) -> Result<()> {
        if self.registry.entity(entity_type).is_none() {
            return Err(ValidationError::UnknownEntity(entity_type.to_string()).into());
        }
        Ok(())
    }

    /// Payload validation without any store access. Callers that stage
    /// multiple writes run this first so a bad payload rejects the request
    /// before anything is committed.
    pub fn validate_aspect(
        &self,
        entity_type: &str,
        aspect_name: &str,
        payload: &Value,
        kind: AspectKind,
    ) -> Result<()> {
        self.validator
            .validate(entity_type, aspect_name, payload, kind)?;
        Ok(())
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Retry a store call while it reports retryable conflicts.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying {what} after conflict: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// MERGE a node with label = entity type and key = URN. Non-key params
    /// are set on create and last-writer-wins on re-upsert; null params are
    /// dropped.
    pub async fn upsert_entity(
        &self,
        entity_type: &str,
        urn: &str,
        params: &JsonMap,
    ) -> Result<()> {
        self.require_entity_type(entity_type)?;
        let props: JsonMap = params
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.with_retry("entity upsert", || {
            let props = props.clone();
            async move {
                self.store
                    .upsert_node(entity_type, urn, &props, Self::now_ms())
                    .await
            }
        })
        .await?;
        info!(entity_type, urn, "entity upserted");
        Ok(())
    }

    /// Versioned write: validate, then atomically take `max_version + 1`,
    /// flip the latest pointer, and insert. Losers of the version race retry
    /// here and observe the new max.
    pub async fn upsert_versioned_aspect(
        &self,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> Result<u64> {
        self.validator
            .validate(entity_type, aspect_name, payload, AspectKind::Versioned)?;
        let version = self
            .with_retry("versioned aspect upsert", || async {
                self.store
                    .insert_versioned_aspect(entity_type, urn, aspect_name, payload, Self::now_ms())
                    .await
            })
            .await?;
        info!(entity_type, urn, aspect_name, version, "versioned aspect written");
        Ok(version)
    }

    /// Append-only write; ordering comes solely from the recorded timestamp.
    /// Returns the timestamp actually recorded.
    pub async fn append_timeseries_aspect(
        &self,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
        timestamp_ms: Option<i64>,
    ) -> Result<i64> {
        self.validator
            .validate(entity_type, aspect_name, payload, AspectKind::Timeseries)?;
        let ts = timestamp_ms.unwrap_or_else(Self::now_ms);
        self.with_retry("timeseries append", || async {
            self.store
                .append_timeseries_aspect(entity_type, urn, aspect_name, payload, ts, Self::now_ms())
                .await
        })
        .await?;
        debug!(entity_type, urn, aspect_name, ts, "timeseries aspect appended");
        Ok(ts)
    }

    /// Idempotent edge merge; see `store::merge_edge_props` for the property
    /// merge policy.
    pub async fn create_relationship(&self, spec: &EdgeMergeSpec) -> Result<MergeOutcome> {
        self.require_entity_type(&spec.src_label)?;
        self.require_entity_type(&spec.dst_label)?;
        let outcome = self
            .with_retry("relationship merge", || async {
                self.store.merge_relationship(spec).await
            })
            .await?;
        debug!(
            src = %spec.src_urn,
            rel = %spec.rel_type,
            dst = %spec.dst_urn,
            ?outcome,
            "relationship merged"
        );
        Ok(outcome)
    }

    /// Cascade removes the node, all its aspect records, and incident edges.
    /// Without cascade, any live aspect or incoming edge aborts the delete.
    pub async fn delete_entity(&self, entity_type: &str, urn: &str, cascade: bool) -> Result<()> {
        self.require_entity_type(entity_type)?;
        if !cascade {
            let DependentCounts {
                aspects,
                incoming_edges,
            } = self.store.count_dependents(urn).await?;
            if aspects > 0 || incoming_edges > 0 {
                return Err(CatalogError::DependencyViolation {
                    urn: urn.to_string(),
                    aspects,
                    incoming_edges,
                });
            }
        }
        let existed = self.store.delete_node(entity_type, urn).await?;
        if !existed {
            return Err(CatalogError::NotFound {
                kind: entity_type.to_string(),
                urn: urn.to_string(),
            });
        }
        info!(entity_type, urn, cascade, "entity deleted");
        Ok(())
    }

    /// Removes every version (or every time-series row) for the pair; the
    /// owning node is preserved.
    pub async fn delete_aspect(
        &self,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
    ) -> Result<usize> {
        self.validator.declared_kind(entity_type, aspect_name)?;
        let removed = self.store.delete_aspect(entity_type, urn, aspect_name).await?;
        if removed == 0 {
            return Err(CatalogError::NotFound {
                kind: format!("{entity_type} aspect {aspect_name}"),
                urn: urn.to_string(),
            });
        }
        info!(entity_type, urn, aspect_name, removed, "aspect deleted");
        Ok(removed)
    }

    // ── Read helpers ──

    pub async fn get_entity(&self, entity_type: &str, urn: &str) -> Result<Option<NodeRecord>> {
        self.require_entity_type(entity_type)?;
        self.store.get_node(entity_type, urn).await
    }

    pub async fn get_latest_versioned_aspect(
        &self,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
    ) -> Result<Option<VersionedAspectRecord>> {
        self.validator.declared_kind(entity_type, aspect_name)?;
        self.store
            .latest_versioned_aspect(entity_type, urn, aspect_name)
            .await
    }

    pub async fn get_timeseries_range(
        &self,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TimeseriesAspectRecord>> {
        self.validator.declared_kind(entity_type, aspect_name)?;
        self.store
            .timeseries_range(entity_type, urn, aspect_name, from_ms, to_ms, limit)
            .await
    }
}
