//! metagraph - registry-driven metadata catalog write core
//!
//! The whole system is driven by a declarative registry describing entity
//! types, aspect types, URN construction rules, relationship rules, and
//! lineage transformation templates. At boot the registry is loaded and
//! validated, per-entity and per-aspect operations are synthesized, and all
//! writes flow through a single graph writer into a property-graph store.
//!
//! ## Call chain
//! Transport → SessionCoordinator → OperationTable → GraphWriter → GraphStore
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use metagraph::{Catalog, MemoryGraphStore, OpRequest, Registry, RetryPolicy, StoreConfig};
//!
//! # async fn boot() -> metagraph::Result<()> {
//! let registry = Registry::load("registry.yaml")?;
//! let store = Arc::new(MemoryGraphStore::new());
//! let catalog = Catalog::bootstrap(registry, store, &StoreConfig::default(), RetryPolicy::default()).await?;
//! let ops = catalog.operations();
//! let result = ops.execute("upsert_dataset", OpRequest::default()).await?;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Store and retry configuration
pub mod config;

// Declarative registry: loading, validation, queries
pub mod registry;

// Deterministic URN construction and reverse parsing
pub mod urn;

// Aspect payload validation
pub mod aspect;

// Persistence: the GraphStore trait and its backends
pub mod store;

// The graph writer - the only mutation path
pub mod writer;

// Declarative relationship rules
pub mod rules;

// Column-level lineage template expansion
pub mod lineage;

// Operation synthesis - the surface transports call
pub mod ops;

// Per-request sessions, deadlines, correlation ids
pub mod session;

// Boot-time wiring
pub mod catalog;

// Public re-exports for the common call chain
pub use aspect::AspectValidator;
pub use catalog::Catalog;
pub use config::{RetryPolicy, StoreConfig};
pub use error::{CatalogError, RegistryError, Result, RuleEvaluationError, UrnError, ValidationError};
pub use lineage::LineageTemplateResolver;
pub use ops::{
    OpDescriptor, OpKind, OpOutput, OpRequest, OperationSynthesizer, OperationTable, WriteOutcome,
};
pub use registry::{AspectKind, Registry};
pub use rules::{CreatedEntity, CreatedRelationship, RuleEngine};
pub use session::{OpResult, RequestError, SessionCoordinator};
pub use store::{GraphStore, MemoryGraphStore, Neo4jGraphStore};
pub use urn::{UrnBuilderSet, UrnTemplate};
pub use writer::GraphWriter;
