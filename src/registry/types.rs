//! Declarative registry document model.
//!
//! Field names follow the registry document format exactly; these structs are
//! the deserialization target for `serde_yaml`. `BTreeMap` keeps iteration
//! order deterministic so synthesized operation tables and rule evaluation
//! are stable across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aspect storage discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectKind {
    Versioned,
    Timeseries,
}

impl AspectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectKind::Versioned => "versioned",
            AspectKind::Timeseries => "timeseries",
        }
    }
}

impl std::fmt::Display for AspectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entity type: its identity parameters, URN recipe, and allowed aspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    /// Ordered; these alone determine the URN.
    pub identifying_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    pub urn_template: String,
    /// Aspect name → kind as declared on this entity.
    #[serde(default)]
    pub aspects: BTreeMap<String, AspectKind>,
}

/// One aspect type: kind, payload schema, and required fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectDef {
    #[serde(rename = "type")]
    pub kind: AspectKind,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// A projection path, or a list of them, on the `dst` side of an extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let paths: &[String] = match self {
            OneOrMany::One(s) => std::slice::from_ref(s),
            OneOrMany::Many(v) => v,
        };
        paths.iter().map(String::as_str)
    }
}

/// How to derive `(source, destination)` tuples from an aspect payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSpec {
    /// Projection for the source side; absent when the source selector is
    /// `owning`.
    #[serde(default)]
    pub src: Option<String>,
    pub dst: OneOrMany,
    /// Edge property name → projection path, evaluated per tuple.
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// The entity the aspect was written against.
    Owning,
    /// The projected value is itself a URN.
    FromUrn,
    /// Build a URN of `entity` from projected parameters.
    FromParams,
}

/// Resolves one endpoint of a rule-created relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    pub kind: SelectorKind,
    /// Entity type of the endpoint; required for `from_urn` and
    /// `from_params`.
    #[serde(default)]
    pub entity: Option<String>,
    /// For `from_params`: identifying param name → projection path.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Edge type plus static properties and discriminating keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Static properties stamped on every edge this rule creates.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Property keys that participate in the edge identity alongside
    /// `(src, type, dst)`.
    #[serde(default)]
    pub discriminators: Vec<String>,
}

/// One declarative relationship rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRule {
    /// Aspect whose upsert triggers this rule.
    pub trigger: String,
    /// Restrict the trigger to this owning entity type.
    #[serde(default)]
    pub entity: Option<String>,
    pub extract: ExtractSpec,
    pub source_selector: Selector,
    pub destination_selector: Selector,
    pub edge: EdgeSpec,
    /// Materialize a URN-only destination entity when it does not exist.
    #[serde(default)]
    pub auto_create_missing: bool,
    #[serde(default)]
    pub allow_self_loops: bool,
}

impl RelationshipRule {
    /// Stable display name for logs and errors.
    pub fn display_name(&self, index: usize) -> String {
        format!("{}#{}:{}", self.trigger, index, self.edge.rel_type)
    }
}

/// A lineage expansion template: description plus edge property recipes,
/// both with `{placeholder}` substitution from the transformation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageTemplate {
    #[serde(default)]
    pub description_template: Option<String>,
    #[serde(default)]
    pub relationship_properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationTemplates {
    pub default: LineageTemplate,
    #[serde(default)]
    pub patterns: BTreeMap<String, LineageTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageConfig {
    pub transformation_templates: TransformationTemplates,
}

/// The raw registry document as parsed from YAML, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDoc {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDef>,
    #[serde(default)]
    pub aspects: BTreeMap<String, AspectDef>,
    #[serde(default)]
    pub relationship_rules: Vec<RelationshipRule>,
    #[serde(default)]
    pub lineage_config: Option<LineageConfig>,
}
