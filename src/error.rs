//! Error handling for the metadata write core.
//!
//! Every user-visible failure maps to exactly one `CatalogError` variant so
//! transport layers can translate kinds mechanically. Errors that reach a
//! caller carry the offending field or URN and the request correlation id
//! (attached by the session coordinator, see `session::RequestContext`).

use thiserror::Error;

/// Top-level error type for the write core.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("URN construction error: {0}")]
    Urn(#[from] UrnError),

    #[error("Rule evaluation error: {0}")]
    Rule(#[from] RuleEvaluationError),

    /// Unique-constraint race on a versioned aspect. Retried internally by
    /// the writer; surfaces only once the retry budget is exhausted.
    #[error("store conflict on ({urn}, {aspect_name}): {detail}")]
    StoreConflict {
        urn: String,
        aspect_name: String,
        detail: String,
    },

    /// Session pool timeout, connection loss. `transient` tells callers a
    /// retry of the whole request may succeed.
    #[error("store unavailable: {detail} (transient: {transient})")]
    StoreUnavailable { detail: String, transient: bool },

    #[error("not found: {kind} {urn}")]
    NotFound { kind: String, urn: String },

    /// Non-cascade delete with live aspects or incoming edges.
    #[error("entity {urn} has dependents: {aspects} aspect(s), {incoming_edges} incoming edge(s)")]
    DependencyViolation {
        urn: String,
        aspects: usize,
        incoming_edges: usize,
    },

    #[error("request deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registry load/validation failures. Fatal at boot: the process refuses to
/// start on any of these.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to parse registry document: {0}")]
    Parse(String),

    #[error("failed to read registry file '{path}': {detail}")]
    Io { path: String, detail: String },

    #[error("{kind} '{name}' referenced by {referrer} is not defined")]
    Reference {
        kind: &'static str,
        name: String,
        referrer: String,
    },

    #[error(
        "aspect '{aspect}' is declared '{declared}' but used as '{used}' by {referrer}"
    )]
    KindMismatch {
        aspect: String,
        declared: String,
        used: String,
        referrer: String,
    },

    #[error("registry include '{path}' redefines {section} key '{key}'")]
    IncludeConflict {
        path: String,
        section: &'static str,
        key: String,
    },

    #[error("invalid identifier '{value}' for {what}: {reason}")]
    InvalidIdentifier {
        what: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Pre-transaction payload rejection. Nothing is written when these fire.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),

    #[error("aspect '{aspect}' is not declared on entity type '{entity}'")]
    UnknownAspect { entity: String, aspect: String },

    #[error("aspect '{aspect}' on '{entity}' is declared '{declared}', not '{requested}'")]
    AspectKindMismatch {
        entity: String,
        aspect: String,
        declared: String,
        requested: String,
    },

    #[error("aspect '{aspect}' payload is missing required field '{field}'")]
    MissingRequiredField { aspect: String, field: String },

    #[error("aspect '{aspect}' payload must be a JSON object")]
    PayloadNotObject { aspect: String },
}

/// URN template compilation and construction failures.
#[derive(Error, Debug)]
pub enum UrnError {
    #[error("missing identifying parameter '{param}' for entity type '{entity}'")]
    MissingParam { entity: String, param: String },

    #[error("malformed URN template for '{entity}': {reason}")]
    MalformedTemplate { entity: String, reason: String },

    #[error("URN '{urn}' does not match the template for entity type '{entity}'")]
    ParseMismatch { entity: String, urn: String },

    #[error("template for '{entity}' is ambiguous; reverse parsing is not available")]
    AmbiguousTemplate { entity: String },
}

/// Bad projection path or projection type error during rule evaluation.
/// Rolls back the enclosing request.
#[derive(Error, Debug)]
pub enum RuleEvaluationError {
    #[error("rule '{rule}': projection '{path}' expected {expected}, found {found}")]
    TypeError {
        rule: String,
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("rule '{rule}': malformed projection path '{path}'")]
    BadPath { rule: String, path: String },

    #[error("rule '{rule}': self-loop on {urn} is not permitted")]
    SelfLoop { rule: String, urn: String },

    #[error("rule '{rule}': destination entity {urn} does not exist and auto_create_missing is off")]
    MissingDestination { rule: String, urn: String },
}

impl CatalogError {
    /// Whether the writer's internal retry loop should attempt the
    /// operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::StoreConflict { .. }
                | CatalogError::StoreUnavailable {
                    transient: true,
                    ..
                }
        )
    }

    /// Stable machine-readable kind for transport layers and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::Registry(_) => "registry_error",
            CatalogError::Validation(_) => "validation_error",
            CatalogError::Urn(_) => "urn_construction_error",
            CatalogError::Rule(_) => "rule_evaluation_error",
            CatalogError::StoreConflict { .. } => "store_conflict",
            CatalogError::StoreUnavailable { .. } => "store_unavailable",
            CatalogError::NotFound { .. } => "not_found",
            CatalogError::DependencyViolation { .. } => "dependency_violation",
            CatalogError::DeadlineExceeded { .. } => "deadline_exceeded",
            CatalogError::Serialization(_) => "serialization_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
