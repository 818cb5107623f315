//! Registry document loading and include resolution.
//!
//! Includes are resolved relative to the including file and merged
//! section-wise before validation. A key defined by two documents is a load
//! failure; includes may add, never redefine.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::RegistryDoc;
use crate::error::RegistryError;

pub fn load_file(path: &Path) -> Result<RegistryDoc, RegistryError> {
    let mut visited = BTreeSet::new();
    let doc = load_recursive(path, &mut visited)?;
    info!(
        entities = doc.entities.len(),
        aspects = doc.aspects.len(),
        rules = doc.relationship_rules.len(),
        "registry loaded from {}",
        path.display()
    );
    Ok(doc)
}

pub fn parse_str(source: &str) -> Result<RegistryDoc, RegistryError> {
    let doc: RegistryDoc =
        serde_yaml::from_str(source).map_err(|e| RegistryError::Parse(e.to_string()))?;
    if !doc.include.is_empty() {
        return Err(RegistryError::Parse(
            "includes are only resolvable when loading from a file path".to_string(),
        ));
    }
    Ok(doc)
}

fn load_recursive(
    path: &Path,
    visited: &mut BTreeSet<PathBuf>,
) -> Result<RegistryDoc, RegistryError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
    if !visited.insert(canonical.clone()) {
        return Err(RegistryError::Parse(format!(
            "include cycle through '{}'",
            canonical.display()
        )));
    }

    let source = std::fs::read_to_string(&canonical).map_err(|e| RegistryError::Io {
        path: canonical.display().to_string(),
        detail: e.to_string(),
    })?;
    let own: RegistryDoc =
        serde_yaml::from_str(&source).map_err(|e| RegistryError::Parse(format!(
            "{}: {}",
            canonical.display(),
            e
        )))?;

    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut merged = RegistryDoc {
        include: Vec::new(),
        entities: Default::default(),
        aspects: Default::default(),
        relationship_rules: Vec::new(),
        lineage_config: None,
    };

    for inc in &own.include {
        let inc_path = base.join(inc);
        debug!("resolving registry include {}", inc_path.display());
        let sub = load_recursive(&inc_path, visited)?;
        merge_into(&mut merged, sub, inc)?;
    }
    merge_into(&mut merged, strip_includes(own), "<root>")?;
    Ok(merged)
}

fn strip_includes(mut doc: RegistryDoc) -> RegistryDoc {
    doc.include.clear();
    doc
}

fn merge_into(
    target: &mut RegistryDoc,
    source: RegistryDoc,
    source_path: &str,
) -> Result<(), RegistryError> {
    for (name, def) in source.entities {
        if target.entities.contains_key(&name) {
            return Err(RegistryError::IncludeConflict {
                path: source_path.to_string(),
                section: "entities",
                key: name,
            });
        }
        target.entities.insert(name, def);
    }
    for (name, def) in source.aspects {
        if target.aspects.contains_key(&name) {
            return Err(RegistryError::IncludeConflict {
                path: source_path.to_string(),
                section: "aspects",
                key: name,
            });
        }
        target.aspects.insert(name, def);
    }
    // Rules are append-only: included rules first, declaration order kept.
    target.relationship_rules.extend(source.relationship_rules);
    if let Some(lineage) = source.lineage_config {
        if target.lineage_config.is_some() {
            return Err(RegistryError::IncludeConflict {
                path: source_path.to_string(),
                section: "lineage_config",
                key: "transformation_templates".to_string(),
            });
        }
        target.lineage_config = Some(lineage);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_document() {
        let doc = parse_str(
            r#"
entities:
  Tag:
    identifying_params: [key]
    urn_template: "urn:li:tag:{key}"
    aspects: {}
aspects: {}
"#,
        )
        .unwrap();
        assert_eq!(doc.entities.len(), 1);
        assert!(doc.entities.contains_key("Tag"));
    }

    #[test]
    fn inline_includes_are_rejected() {
        let err = parse_str("include: [other.yaml]\nentities: {}\n").unwrap_err();
        assert!(matches!(err, RegistryError::Parse(_)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_str("entities: [not, a, map]").unwrap_err();
        assert!(matches!(err, RegistryError::Parse(_)));
    }
}
