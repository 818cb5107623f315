//! Projection paths over aspect payloads.
//!
//! Syntax: dot-separated field names, with `[]` after a segment to expand an
//! array, e.g. `owners[].owner` or `inputFields[]`. Evaluation returns every
//! value the path reaches, in array-index order.
//!
//! Null or missing fields yield no values (callers skip silently, per the
//! rule contract); traversing *into* a scalar, or expanding a non-array, is
//! a type error.

use serde_json::Value;

use crate::error::RuleEvaluationError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    field: String,
    expand: bool,
}

/// A parsed projection path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionPath {
    raw: String,
    steps: Vec<Step>,
}

impl ProjectionPath {
    pub fn parse(rule: &str, raw: &str) -> Result<Self, RuleEvaluationError> {
        let bad = || RuleEvaluationError::BadPath {
            rule: rule.to_string(),
            path: raw.to_string(),
        };
        if raw.is_empty() {
            return Err(bad());
        }
        let mut steps = Vec::new();
        for segment in raw.split('.') {
            let (field, expand) = match segment.strip_suffix("[]") {
                Some(field) => (field, true),
                None => (segment, false),
            };
            if field.is_empty() || field.contains(['[', ']']) {
                return Err(bad());
            }
            steps.push(Step {
                field: field.to_string(),
                expand,
            });
        }
        Ok(Self {
            raw: raw.to_string(),
            steps,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Every value reached by the path, in deterministic order.
    pub fn evaluate(&self, rule: &str, payload: &Value) -> Result<Vec<Value>, RuleEvaluationError> {
        let mut current = vec![payload.clone()];
        for step in &self.steps {
            let mut next = Vec::new();
            for value in current {
                match value {
                    Value::Null => {}
                    Value::Object(map) => match map.get(&step.field) {
                        None | Some(Value::Null) => {}
                        Some(found) => {
                            if step.expand {
                                match found {
                                    Value::Array(items) => next.extend(items.iter().cloned()),
                                    other => {
                                        return Err(RuleEvaluationError::TypeError {
                                            rule: rule.to_string(),
                                            path: self.raw.clone(),
                                            expected: "array",
                                            found: type_name(other),
                                        })
                                    }
                                }
                            } else {
                                next.push(found.clone());
                            }
                        }
                    },
                    other => {
                        return Err(RuleEvaluationError::TypeError {
                            rule: rule.to_string(),
                            path: self.raw.clone(),
                            expected: "object",
                            found: type_name(&other),
                        })
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Projected values used as URNs or URN parameters must be strings.
pub fn expect_string(
    rule: &str,
    path: &str,
    value: &Value,
) -> Result<String, RuleEvaluationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(RuleEvaluationError::TypeError {
            rule: rule.to_string(),
            path: path.to_string(),
            expected: "string",
            found: type_name(other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(path: &str, payload: Value) -> Result<Vec<Value>, RuleEvaluationError> {
        ProjectionPath::parse("test", path)?.evaluate("test", &payload)
    }

    #[test]
    fn plain_field_access() {
        let got = eval("description", json!({"description": "x"})).unwrap();
        assert_eq!(got, vec![json!("x")]);
    }

    #[test]
    fn nested_fields() {
        let got = eval("job.parent.name", json!({"job": {"parent": {"name": "etl"}}})).unwrap();
        assert_eq!(got, vec![json!("etl")]);
    }

    #[test]
    fn array_expansion_preserves_index_order() {
        let payload = json!({"owners": [
            {"owner": "urn:li:corpuser:alice", "type": "DATA_OWNER"},
            {"owner": "urn:li:corpuser:bob", "type": "STEWARD"}
        ]});
        let got = eval("owners[].owner", payload).unwrap();
        assert_eq!(
            got,
            vec![json!("urn:li:corpuser:alice"), json!("urn:li:corpuser:bob")]
        );
    }

    #[test]
    fn missing_and_null_yield_nothing() {
        assert!(eval("owners[].owner", json!({})).unwrap().is_empty());
        assert!(eval("owners[].owner", json!({"owners": null})).unwrap().is_empty());
        assert!(eval("a.b", json!({"a": {}})).unwrap().is_empty());
    }

    #[test]
    fn expanding_a_scalar_is_a_type_error() {
        let err = eval("owners[]", json!({"owners": "alice"})).unwrap_err();
        assert!(matches!(
            err,
            RuleEvaluationError::TypeError {
                expected: "array",
                found: "string",
                ..
            }
        ));
    }

    #[test]
    fn traversing_into_a_scalar_is_a_type_error() {
        let err = eval("owner.name", json!({"owner": 42})).unwrap_err();
        assert!(matches!(
            err,
            RuleEvaluationError::TypeError {
                expected: "object",
                found: "number",
                ..
            }
        ));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(ProjectionPath::parse("r", "").is_err());
        assert!(ProjectionPath::parse("r", "a..b").is_err());
        assert!(ProjectionPath::parse("r", "a[.b").is_err());
        assert!(ProjectionPath::parse("r", "[]").is_err());
    }
}
