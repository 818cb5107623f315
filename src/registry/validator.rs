//! Registry referential-integrity validation.
//!
//! Runs after loading, before anything else sees the document. Passes, in
//! order: identifier well-formedness, entity→aspect references, URN template
//! parameters, relationship-rule references, and aspect-kind agreement.
//! Any failure is fatal; a partially valid registry is never exposed.

use super::types::{RegistryDoc, RelationshipRule, Selector, SelectorKind};
use crate::error::RegistryError;
use crate::urn::UrnTemplate;

pub fn validate(doc: &RegistryDoc) -> Result<(), RegistryError> {
    check_identifiers(doc)?;
    check_entity_aspects(doc)?;
    check_urn_templates(doc)?;
    for (index, rule) in doc.relationship_rules.iter().enumerate() {
        check_rule(doc, index, rule)?;
    }
    Ok(())
}

/// Labels and relationship types are spliced into store queries, so they are
/// restricted to identifier characters at load time.
fn is_label_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_edge_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && s.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn check_identifiers(doc: &RegistryDoc) -> Result<(), RegistryError> {
    for name in doc.entities.keys() {
        if !is_label_ident(name) {
            return Err(RegistryError::InvalidIdentifier {
                what: "entity type",
                value: name.clone(),
                reason: "must be alphanumeric/underscore, starting with a letter",
            });
        }
    }
    for name in doc.aspects.keys() {
        if !is_label_ident(name) {
            return Err(RegistryError::InvalidIdentifier {
                what: "aspect name",
                value: name.clone(),
                reason: "must be alphanumeric/underscore, starting with a letter",
            });
        }
    }
    for (index, rule) in doc.relationship_rules.iter().enumerate() {
        if !is_edge_ident(&rule.edge.rel_type) {
            return Err(RegistryError::InvalidIdentifier {
                what: "edge type",
                value: format!("{} (rule #{index})", rule.edge.rel_type),
                reason: "must be UPPER_SNAKE_CASE",
            });
        }
    }
    for (entity, def) in &doc.entities {
        if def.identifying_params.is_empty() {
            return Err(RegistryError::InvalidIdentifier {
                what: "identifying_params",
                value: entity.clone(),
                reason: "must declare at least one identifying parameter",
            });
        }
    }
    Ok(())
}

fn check_entity_aspects(doc: &RegistryDoc) -> Result<(), RegistryError> {
    for (entity, def) in &doc.entities {
        for (aspect, declared_kind) in &def.aspects {
            let aspect_def =
                doc.aspects
                    .get(aspect)
                    .ok_or_else(|| RegistryError::Reference {
                        kind: "aspect",
                        name: aspect.clone(),
                        referrer: format!("entity '{entity}'"),
                    })?;
            if aspect_def.kind != *declared_kind {
                return Err(RegistryError::KindMismatch {
                    aspect: aspect.clone(),
                    declared: aspect_def.kind.to_string(),
                    used: declared_kind.to_string(),
                    referrer: format!("entity '{entity}'"),
                });
            }
        }
    }
    Ok(())
}

fn check_urn_templates(doc: &RegistryDoc) -> Result<(), RegistryError> {
    for (entity, def) in &doc.entities {
        let template = UrnTemplate::compile(entity, &def.urn_template)
            .map_err(|e| RegistryError::Parse(e.to_string()))?;
        for placeholder in template.placeholders() {
            let declared = def.identifying_params.iter().any(|p| p == placeholder)
                || def.optional_params.iter().any(|p| p == placeholder);
            if !declared {
                return Err(RegistryError::Reference {
                    kind: "parameter",
                    name: placeholder.to_string(),
                    referrer: format!("urn_template of entity '{entity}'"),
                });
            }
        }
    }
    Ok(())
}

fn check_selector(
    doc: &RegistryDoc,
    selector: &Selector,
    referrer: &str,
) -> Result<(), RegistryError> {
    match selector.kind {
        SelectorKind::Owning => Ok(()),
        SelectorKind::FromUrn | SelectorKind::FromParams => {
            let entity = selector
                .entity
                .as_deref()
                .ok_or_else(|| RegistryError::Reference {
                    kind: "entity",
                    name: "<missing selector entity>".to_string(),
                    referrer: referrer.to_string(),
                })?;
            if !doc.entities.contains_key(entity) {
                return Err(RegistryError::Reference {
                    kind: "entity",
                    name: entity.to_string(),
                    referrer: referrer.to_string(),
                });
            }
            if selector.kind == SelectorKind::FromParams {
                let def = &doc.entities[entity];
                for param in def.identifying_params.iter() {
                    if !selector.params.contains_key(param) {
                        return Err(RegistryError::Reference {
                            kind: "parameter",
                            name: param.clone(),
                            referrer: format!("{referrer} (from_params selector)"),
                        });
                    }
                }
            }
            Ok(())
        }
    }
}

fn check_rule(
    doc: &RegistryDoc,
    index: usize,
    rule: &RelationshipRule,
) -> Result<(), RegistryError> {
    let referrer = format!("relationship rule #{index} ({})", rule.edge.rel_type);

    if !doc.aspects.contains_key(&rule.trigger) {
        return Err(RegistryError::Reference {
            kind: "aspect",
            name: rule.trigger.clone(),
            referrer,
        });
    }
    if let Some(entity) = &rule.entity {
        let def = doc
            .entities
            .get(entity)
            .ok_or_else(|| RegistryError::Reference {
                kind: "entity",
                name: entity.clone(),
                referrer: referrer.clone(),
            })?;
        if !def.aspects.contains_key(&rule.trigger) {
            return Err(RegistryError::Reference {
                kind: "aspect",
                name: rule.trigger.clone(),
                referrer: format!("{referrer} on entity '{entity}'"),
            });
        }
    }

    check_selector(doc, &rule.source_selector, &referrer)?;
    check_selector(doc, &rule.destination_selector, &referrer)?;

    if rule.source_selector.kind != SelectorKind::Owning && rule.extract.src.is_none() {
        return Err(RegistryError::Reference {
            kind: "projection",
            name: "extract.src".to_string(),
            referrer,
        });
    }

    // Discriminators must resolve from projected or static properties.
    for disc in &rule.edge.discriminators {
        let known = rule.extract.props.contains_key(disc)
            || rule.edge.properties.contains_key(disc);
        if !known {
            return Err(RegistryError::Reference {
                kind: "discriminator",
                name: disc.clone(),
                referrer,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::loader::parse_str;

    fn base_doc() -> &'static str {
        r#"
entities:
  Dataset:
    identifying_params: [platform, name, env]
    urn_template: "urn:li:dataset:(urn:li:dataPlatform:{platform},{name},{env})"
    aspects:
      ownership: versioned
  CorpUser:
    identifying_params: [username]
    urn_template: "urn:li:corpuser:{username}"
aspects:
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
"#
    }

    #[test]
    fn valid_document_passes() {
        let doc = parse_str(base_doc()).unwrap();
        validate(&doc).unwrap();
    }

    #[test]
    fn undefined_aspect_reference_fails() {
        let doc = parse_str(
            r#"
entities:
  Dataset:
    identifying_params: [name]
    urn_template: "urn:li:dataset:{name}"
    aspects:
      ghost: versioned
aspects: {}
"#,
        )
        .unwrap();
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, RegistryError::Reference { kind: "aspect", .. }));
    }

    #[test]
    fn kind_mismatch_fails() {
        let doc = parse_str(
            r#"
entities:
  Dataset:
    identifying_params: [name]
    urn_template: "urn:li:dataset:{name}"
    aspects:
      profile: versioned
aspects:
  profile:
    type: timeseries
"#,
        )
        .unwrap();
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, RegistryError::KindMismatch { .. }));
    }

    #[test]
    fn template_with_undeclared_param_fails() {
        let doc = parse_str(
            r#"
entities:
  Tag:
    identifying_params: [key]
    urn_template: "urn:li:tag:{key}:{shadow}"
aspects: {}
"#,
        )
        .unwrap();
        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Reference {
                kind: "parameter",
                ..
            }
        ));
    }

    #[test]
    fn rule_against_unknown_entity_fails() {
        let mut source = base_doc().to_string();
        source.push_str(
            r#"  - trigger: ownership
    extract: { dst: "owners[].owner" }
    source_selector: { kind: owning }
    destination_selector: { kind: from_urn, entity: Phantom }
    edge: { type: OWNED_BY }
"#,
        );
        let doc = parse_str(&source).unwrap();
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, RegistryError::Reference { kind: "entity", .. }));
    }

    #[test]
    fn lowercase_edge_type_fails() {
        let source = base_doc().replace("type: OWNED_BY", "type: ownedBy");
        let doc = parse_str(&source).unwrap();
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidIdentifier { .. }));
    }

    #[test]
    fn undeclared_discriminator_fails() {
        let source = base_doc().replace("discriminators: [type]", "discriminators: [missing]");
        let doc = parse_str(&source).unwrap();
        let err = validate(&doc).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Reference {
                kind: "discriminator",
                ..
            }
        ));
    }
}
