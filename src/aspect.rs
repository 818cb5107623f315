//! Aspect payload validation against the registry.
//!
//! Runs before any transaction is opened; a payload that fails here is never
//! written. Unknown payload fields pass through untouched for forward
//! compatibility.

use serde_json::Value;

use crate::error::ValidationError;
use crate::registry::{AspectKind, Registry};

#[derive(Debug, Clone)]
pub struct AspectValidator {
    registry: std::sync::Arc<Registry>,
}

impl AspectValidator {
    pub fn new(registry: std::sync::Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Confirm the aspect is declared on the entity with the requested kind
    /// and that all required payload fields are present and non-null.
    pub fn validate(
        &self,
        entity_type: &str,
        aspect_name: &str,
        payload: &Value,
        requested: AspectKind,
    ) -> Result<(), ValidationError> {
        let declared = self.declared_kind(entity_type, aspect_name)?;
        if declared != requested {
            return Err(ValidationError::AspectKindMismatch {
                entity: entity_type.to_string(),
                aspect: aspect_name.to_string(),
                declared: declared.to_string(),
                requested: requested.to_string(),
            });
        }

        let object = payload
            .as_object()
            .ok_or_else(|| ValidationError::PayloadNotObject {
                aspect: aspect_name.to_string(),
            })?;

        if let Some(def) = self.registry.aspect(aspect_name) {
            for field in &def.required {
                let present = object.get(field).is_some_and(|v| !v.is_null());
                if !present {
                    return Err(ValidationError::MissingRequiredField {
                        aspect: aspect_name.to_string(),
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The kind the entity declares for this aspect.
    pub fn declared_kind(
        &self,
        entity_type: &str,
        aspect_name: &str,
    ) -> Result<AspectKind, ValidationError> {
        let entity = self
            .registry
            .entity(entity_type)
            .ok_or_else(|| ValidationError::UnknownEntity(entity_type.to_string()))?;
        entity
            .aspects
            .get(aspect_name)
            .copied()
            .ok_or_else(|| ValidationError::UnknownAspect {
                entity: entity_type.to_string(),
                aspect: aspect_name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn validator() -> AspectValidator {
        let registry = Registry::from_str(
            r#"
entities:
  Dataset:
    identifying_params: [platform, name, env]
    urn_template: "urn:li:dataset:(urn:li:dataPlatform:{platform},{name},{env})"
    aspects:
      datasetProperties: versioned
      datasetProfile: timeseries
aspects:
  datasetProperties:
    type: versioned
    properties: [description, customProperties]
    required: [description]
  datasetProfile:
    type: timeseries
    properties: [rowCount]
"#,
        )
        .unwrap();
        AspectValidator::new(Arc::new(registry))
    }

    #[test]
    fn exact_required_fields_pass() {
        let v = validator();
        v.validate(
            "Dataset",
            "datasetProperties",
            &json!({"description": "x"}),
            AspectKind::Versioned,
        )
        .unwrap();
    }

    #[test]
    fn missing_required_field_fails() {
        let v = validator();
        let err = v
            .validate(
                "Dataset",
                "datasetProperties",
                &json!({"customProperties": {}}),
                AspectKind::Versioned,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingRequiredField { ref field, .. } if field == "description"
        ));
    }

    #[test]
    fn null_required_field_fails() {
        let v = validator();
        let err = v
            .validate(
                "Dataset",
                "datasetProperties",
                &json!({"description": null}),
                AspectKind::Versioned,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequiredField { .. }));
    }

    #[test]
    fn unknown_fields_are_permitted() {
        let v = validator();
        v.validate(
            "Dataset",
            "datasetProperties",
            &json!({"description": "x", "futureField": [1, 2, 3]}),
            AspectKind::Versioned,
        )
        .unwrap();
    }

    #[test]
    fn kind_mismatch_fails() {
        let v = validator();
        let err = v
            .validate(
                "Dataset",
                "datasetProfile",
                &json!({"rowCount": 10}),
                AspectKind::Versioned,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::AspectKindMismatch { .. }));
    }

    #[test]
    fn undeclared_aspect_fails() {
        let v = validator();
        let err = v
            .validate(
                "Dataset",
                "schemaMetadata",
                &json!({}),
                AspectKind::Versioned,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownAspect { .. }));
    }

    #[test]
    fn unknown_entity_fails() {
        let v = validator();
        let err = v
            .validate("Chart", "datasetProperties", &json!({}), AspectKind::Versioned)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEntity(_)));
    }
}
