//! Boot-time wiring: registry + store → writer → operation table →
//! coordinator.
//!
//! Everything here is constructed once at process start and torn down at
//! shutdown; no component re-reads configuration afterwards.

use std::sync::Arc;

use tracing::info;

use crate::config::{RetryPolicy, StoreConfig};
use crate::error::Result;
use crate::ops::{OperationSynthesizer, OperationTable};
use crate::registry::Registry;
use crate::session::SessionCoordinator;
use crate::store::GraphStore;
use crate::writer::GraphWriter;

/// The assembled write core. Process-wide singleton.
pub struct Catalog {
    registry: Arc<Registry>,
    writer: Arc<GraphWriter>,
    operations: Arc<OperationTable>,
    coordinator: SessionCoordinator,
}

impl Catalog {
    /// Validate the registry against the store (bootstrap constraints and
    /// indices), synthesize the operation table, and wire the coordinator.
    pub async fn bootstrap(
        registry: Registry,
        store: Arc<dyn GraphStore>,
        config: &StoreConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let registry = Arc::new(registry);
        store.ensure_constraints(&registry).await?;

        let writer = Arc::new(GraphWriter::new(store, registry.clone(), retry));
        let operations = Arc::new(OperationSynthesizer::synthesize(
            registry.clone(),
            writer.clone(),
        )?);
        let coordinator = SessionCoordinator::new(operations.clone(), config);
        info!(
            entities = registry.entity_types().count(),
            aspects = registry.aspect_names().count(),
            "catalog bootstrapped"
        );
        Ok(Self {
            registry,
            writer,
            operations,
            coordinator,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn writer(&self) -> &GraphWriter {
        &self.writer
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }
}
