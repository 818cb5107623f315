//! Registry loading, validation, and query surface.
//!
//! The registry is the single declarative source of truth: entity types with
//! their identifying parameters and URN templates, aspect types with their
//! payload schemas, relationship rules, and optional lineage templates. It is
//! loaded and validated once at boot; afterwards it is immutable and shared
//! behind an `Arc`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::RegistryError;

pub(crate) mod loader;
mod types;
mod validator;

pub use types::{
    AspectDef, AspectKind, EdgeSpec, EntityDef, ExtractSpec, LineageConfig, LineageTemplate,
    OneOrMany, RegistryDoc, RelationshipRule, Selector, SelectorKind, TransformationTemplates,
};

/// A validated registry. Construction fails rather than ever exposing a
/// partially valid document.
#[derive(Debug, Clone)]
pub struct Registry {
    doc: RegistryDoc,
    /// Aspect name → indices into `doc.relationship_rules`, declaration order.
    rules_by_trigger: HashMap<String, Vec<usize>>,
}

impl Registry {
    /// Load from a file, resolving `include` entries relative to it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        Self::from_doc(loader::load_file(path.as_ref())?)
    }

    /// Parse from an in-memory document (no includes).
    pub fn from_str(source: &str) -> Result<Self, RegistryError> {
        Self::from_doc(loader::parse_str(source)?)
    }

    fn from_doc(doc: RegistryDoc) -> Result<Self, RegistryError> {
        validator::validate(&doc)?;
        let mut rules_by_trigger: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, rule) in doc.relationship_rules.iter().enumerate() {
            rules_by_trigger
                .entry(rule.trigger.clone())
                .or_default()
                .push(index);
        }
        Ok(Self {
            doc,
            rules_by_trigger,
        })
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.doc.entities.keys().map(String::as_str)
    }

    pub fn entity(&self, entity_type: &str) -> Option<&EntityDef> {
        self.doc.entities.get(entity_type)
    }

    pub fn aspect(&self, aspect_name: &str) -> Option<&AspectDef> {
        self.doc.aspects.get(aspect_name)
    }

    pub fn aspect_names(&self) -> impl Iterator<Item = &str> {
        self.doc.aspects.keys().map(String::as_str)
    }

    /// Aspects declared on an entity type, with their kinds.
    pub fn aspects_of(&self, entity_type: &str) -> impl Iterator<Item = (&str, AspectKind)> {
        self.doc
            .entities
            .get(entity_type)
            .into_iter()
            .flat_map(|def| def.aspects.iter().map(|(name, kind)| (name.as_str(), *kind)))
    }

    pub fn aspect_kind(&self, aspect_name: &str) -> Option<AspectKind> {
        self.doc.aspects.get(aspect_name).map(|def| def.kind)
    }

    pub fn urn_template(&self, entity_type: &str) -> Option<&str> {
        self.doc
            .entities
            .get(entity_type)
            .map(|def| def.urn_template.as_str())
    }

    /// Rules triggered by an aspect upsert, in declaration order. Each item
    /// is `(declaration_index, rule)`.
    pub fn relationship_rules_for(
        &self,
        aspect_name: &str,
    ) -> impl Iterator<Item = (usize, &RelationshipRule)> {
        self.rules_by_trigger
            .get(aspect_name)
            .into_iter()
            .flatten()
            .map(|&i| (i, &self.doc.relationship_rules[i]))
    }

    pub fn relationship_rules(&self) -> &[RelationshipRule] {
        &self.doc.relationship_rules
    }

    pub fn lineage_config(&self) -> Option<&LineageConfig> {
        self.doc.lineage_config.as_ref()
    }

    /// Every relationship type any rule can emit; used for bootstrap index
    /// creation.
    pub fn relationship_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .doc
            .relationship_rules
            .iter()
            .map(|r| r.edge.rel_type.as_str())
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
entities:
  Dataset:
    identifying_params: [platform, name, env]
    optional_params: [versionId]
    urn_template: "urn:li:dataset:(urn:li:dataPlatform:{platform},{name},{env})"
    aspects:
      datasetProperties: versioned
      datasetProfile: timeseries
      ownership: versioned
  CorpUser:
    identifying_params: [username]
    urn_template: "urn:li:corpuser:{username}"
aspects:
  datasetProperties:
    type: versioned
    properties: [description]
    required: [description]
  datasetProfile:
    type: timeseries
    properties: [rowCount, size]
  ownership:
    type: versioned
    properties: [owners]
    required: [owners]
relationship_rules:
  - trigger: ownership
    extract: { dst: "owners[].owner", props: { type: "owners[].type" } }
    source_selector: { kind: owning }
    destination_selector: { kind: from_urn, entity: CorpUser }
    edge: { type: OWNED_BY, discriminators: [type] }
    auto_create_missing: true
"#;

    #[test]
    fn queries_cover_the_document() {
        let registry = Registry::from_str(DOC).unwrap();
        let entities: Vec<&str> = registry.entity_types().collect();
        assert_eq!(entities, vec!["CorpUser", "Dataset"]);

        let aspects: Vec<(&str, AspectKind)> = registry.aspects_of("Dataset").collect();
        assert_eq!(aspects.len(), 3);
        assert!(aspects.contains(&("datasetProfile", AspectKind::Timeseries)));

        assert_eq!(
            registry.aspect_kind("ownership"),
            Some(AspectKind::Versioned)
        );
        assert_eq!(
            registry.urn_template("CorpUser"),
            Some("urn:li:corpuser:{username}")
        );

        let rules: Vec<_> = registry.relationship_rules_for("ownership").collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].1.edge.rel_type, "OWNED_BY");
        assert!(registry.relationship_rules_for("datasetProfile").next().is_none());

        assert_eq!(registry.relationship_types(), vec!["OWNED_BY"]);
    }

    #[test]
    fn invalid_document_never_constructs() {
        let bad = DOC.replace("type: versioned\n    properties: [owners]", "type: timeseries\n    properties: [owners]");
        assert!(Registry::from_str(&bad).is_err());
    }
}
