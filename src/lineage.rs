//! Column-level lineage expansion from transformation aspects.
//!
//! When the registry carries `lineage_config`, an aspect payload describing
//! a transformation (a `transformation_type`, an ordered `input_columns`
//! list, an optional `description`) expands into one `DERIVES_FROM` edge per
//! input column, from the owning column to the input column. Edge properties
//! and the description come from the template matching the transformation
//! type; unknown types fall back to the `default` template with placeholders
//! populated literally from the payload.

use std::sync::Arc;

use serde_json::Value;

use crate::error::RuleEvaluationError;
use crate::registry::{LineageTemplate, Registry};
use crate::rules::PlannedEdge;
use crate::store::JsonMap;
use crate::urn::UrnBuilderSet;

const DERIVES_FROM: &str = "DERIVES_FROM";

pub struct LineageTemplateResolver {
    registry: Arc<Registry>,
    urns: Arc<UrnBuilderSet>,
}

impl LineageTemplateResolver {
    pub fn new(registry: Arc<Registry>, urns: Arc<UrnBuilderSet>) -> Self {
        Self { registry, urns }
    }

    /// A payload is a transformation when the registry has lineage templates
    /// and the payload names a transformation type and input columns.
    pub fn applies_to(&self, payload: &Value) -> bool {
        self.registry.lineage_config().is_some()
            && transformation_type(payload).is_some()
            && input_columns_field(payload).is_some()
    }

    /// Expand the transformation into planned `DERIVES_FROM` edges, in input
    /// column order.
    pub fn plan(
        &self,
        entity_type: &str,
        owning_urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> Result<Vec<PlannedEdge>, RuleEvaluationError> {
        let Some(config) = self.registry.lineage_config() else {
            return Ok(Vec::new());
        };
        let Some(kind) = transformation_type(payload) else {
            return Ok(Vec::new());
        };
        let inputs = self.input_columns(aspect_name, payload)?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let default = &config.transformation_templates.default;
        let template = config
            .transformation_templates
            .patterns
            .get(&kind)
            .unwrap_or(default);
        let props = self.render_props(template, default, &kind, &inputs, payload);

        let mut edges = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let dst_urn = self.resolve_input_urn(entity_type, owning_urn, aspect_name, input)?;
            if dst_urn == owning_urn {
                return Err(RuleEvaluationError::SelfLoop {
                    rule: format!("lineage:{kind}"),
                    urn: dst_urn,
                });
            }
            edges.push(PlannedEdge {
                rule: format!("lineage:{kind}"),
                rel_type: DERIVES_FROM.to_string(),
                src_label: entity_type.to_string(),
                src_urn: owning_urn.to_string(),
                src_is_owner: true,
                dst_label: entity_type.to_string(),
                dst_urn,
                dst_is_owner: false,
                props: props.clone(),
                discriminators: Vec::new(),
                auto_create_missing: true,
                via: aspect_name.to_string(),
            });
        }
        Ok(edges)
    }

    fn render_props(
        &self,
        template: &LineageTemplate,
        default: &LineageTemplate,
        kind: &str,
        inputs: &[String],
        payload: &Value,
    ) -> JsonMap {
        // A pattern that leaves a slot empty inherits it from the default
        // template.
        let property_recipes = if template.relationship_properties.is_empty() {
            &default.relationship_properties
        } else {
            &template.relationship_properties
        };
        let description_recipe = template
            .description_template
            .as_ref()
            .or(default.description_template.as_ref());

        let mut props = JsonMap::new();
        for (key, recipe) in property_recipes {
            props.insert(
                key.clone(),
                Value::String(substitute(recipe, kind, inputs, payload)),
            );
        }
        if let Some(recipe) = description_recipe {
            if !props.contains_key("description") {
                props.insert(
                    "description".to_string(),
                    Value::String(substitute(recipe, kind, inputs, payload)),
                );
            }
        }
        props.insert(
            "transformation".to_string(),
            Value::String(kind.to_string()),
        );
        props
    }

    fn input_columns(
        &self,
        aspect_name: &str,
        payload: &Value,
    ) -> Result<Vec<String>, RuleEvaluationError> {
        let Some(raw) = input_columns_field(payload) else {
            return Ok(Vec::new());
        };
        let items = raw
            .as_array()
            .ok_or_else(|| RuleEvaluationError::TypeError {
                rule: format!("lineage via {aspect_name}"),
                path: "input_columns".to_string(),
                expected: "array",
                found: "non-array",
            })?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RuleEvaluationError::TypeError {
                        rule: format!("lineage via {aspect_name}"),
                        path: "input_columns[]".to_string(),
                        expected: "string",
                        found: "non-string",
                    })
            })
            .collect()
    }

    /// A full URN passes through; a bare field path resolves as a sibling
    /// column of the owning one, by reverse-parsing the owning URN and
    /// swapping the final identifying parameter.
    fn resolve_input_urn(
        &self,
        entity_type: &str,
        owning_urn: &str,
        aspect_name: &str,
        input: &str,
    ) -> Result<String, RuleEvaluationError> {
        if input.starts_with("urn:") {
            return Ok(input.to_string());
        }
        let lineage_error = |detail: String| RuleEvaluationError::TypeError {
            rule: format!("lineage via {aspect_name}"),
            path: format!("input_columns ({detail})"),
            expected: "resolvable input column",
            found: "unresolvable field path",
        };
        let field_param = self
            .registry
            .entity(entity_type)
            .and_then(|def| def.identifying_params.last().cloned())
            .ok_or_else(|| lineage_error(format!("unknown entity {entity_type}")))?;
        let mut params = self
            .urns
            .parse(entity_type, owning_urn)
            .map_err(|e| lineage_error(e.to_string()))?;
        params.insert(field_param, Value::String(input.to_string()));
        self.urns
            .build(entity_type, &params)
            .map_err(|e| lineage_error(e.to_string()))
    }
}

fn transformation_type(payload: &Value) -> Option<String> {
    payload
        .get("transformation_type")
        .or_else(|| payload.get("transformationType"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn input_columns_field(payload: &Value) -> Option<&Value> {
    payload
        .get("input_columns")
        .or_else(|| payload.get("inputColumns"))
        .filter(|v| !v.is_null())
}

/// Fill `{placeholder}` slots from the payload. `transformation_type`,
/// `input_columns`, and `description` have derived values; any other
/// placeholder takes the payload's top-level scalar of the same name, or
/// empty when absent.
fn substitute(recipe: &str, kind: &str, inputs: &[String], payload: &Value) -> String {
    let mut out = String::with_capacity(recipe.len());
    let mut chars = recipe.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                closed = true;
                break;
            }
            name.push(inner);
        }
        if !closed {
            out.push('{');
            out.push_str(&name);
            break;
        }
        match name.as_str() {
            "transformation_type" => out.push_str(kind),
            "input_columns" => out.push_str(&inputs.join(", ")),
            "description" => {
                if let Some(desc) = payload.get("description").and_then(Value::as_str) {
                    out.push_str(desc);
                }
            }
            other => {
                match payload.get(other) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Number(n)) => out.push_str(&n.to_string()),
                    Some(Value::Bool(b)) => out.push_str(&b.to_string()),
                    _ => {}
                }
            }
        }
    }
    out
}
