//! Rule planning and application.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::path::{expect_string, ProjectionPath};
use crate::error::{Result, RuleEvaluationError};
use crate::registry::{Registry, RelationshipRule, Selector, SelectorKind};
use crate::store::{EdgeMergeSpec, JsonMap, MergeOutcome};
use crate::urn::UrnBuilderSet;
use crate::writer::GraphWriter;

/// One edge merge the planner decided on. Endpoints flagged `is_owner`
/// already exist by construction; the others may need auto-creation.
#[derive(Debug, Clone)]
pub struct PlannedEdge {
    pub rule: String,
    pub rel_type: String,
    pub src_label: String,
    pub src_urn: String,
    pub src_is_owner: bool,
    pub dst_label: String,
    pub dst_urn: String,
    pub dst_is_owner: bool,
    pub props: JsonMap,
    pub discriminators: Vec<String>,
    pub auto_create_missing: bool,
    pub via: String,
}

/// Reported back to the caller in the operation result.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedRelationship {
    pub rel_type: String,
    pub src_urn: String,
    pub dst_urn: String,
    pub created: bool,
}

/// An entity materialized URN-only by `auto_create_missing`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedEntity {
    pub entity_type: String,
    pub urn: String,
}

/// Values for one endpoint of a rule, before pairing.
enum Endpoint {
    /// The owning entity; constant across all pairs.
    Owner,
    /// Per-index `(label, urn)` tuples.
    Resolved(String, Vec<String>),
}

pub struct RuleEngine {
    registry: Arc<Registry>,
    urns: Arc<UrnBuilderSet>,
}

impl RuleEngine {
    pub fn new(registry: Arc<Registry>, urns: Arc<UrnBuilderSet>) -> Self {
        Self { registry, urns }
    }

    /// Project the payload through every rule triggered by this aspect.
    /// Pure: no store access, no writes. Rules whose projections come back
    /// empty are skipped silently; projection type errors abort the request.
    pub fn plan(
        &self,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> std::result::Result<Vec<PlannedEdge>, RuleEvaluationError> {
        let mut planned = Vec::new();
        let mut seen: HashSet<(String, String, String, String)> = HashSet::new();

        for (index, rule) in self.registry.relationship_rules_for(aspect_name) {
            if rule.entity.as_deref().is_some_and(|e| e != entity_type) {
                continue;
            }
            let name = rule.display_name(index);
            let edges = self.plan_rule(&name, rule, entity_type, urn, aspect_name, payload)?;
            for edge in edges {
                let disc_key = edge
                    .discriminators
                    .iter()
                    .map(|d| {
                        edge.props
                            .get(d)
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join("\u{1f}");
                // Duplicate (src, type, dst) tuples collapse to one merge.
                if seen.insert((
                    edge.src_urn.clone(),
                    edge.rel_type.clone(),
                    edge.dst_urn.clone(),
                    disc_key,
                )) {
                    planned.push(edge);
                }
            }
        }
        Ok(planned)
    }

    fn plan_rule(
        &self,
        name: &str,
        rule: &RelationshipRule,
        entity_type: &str,
        urn: &str,
        aspect_name: &str,
        payload: &Value,
    ) -> std::result::Result<Vec<PlannedEdge>, RuleEvaluationError> {
        let src = self.resolve_endpoint(name, rule, &rule.source_selector, true, payload)?;
        let dst = self.resolve_endpoint(name, rule, &rule.destination_selector, false, payload)?;

        let src_len = match &src {
            Endpoint::Owner => 1,
            Endpoint::Resolved(_, urns) => urns.len(),
        };
        let dst_len = match &dst {
            Endpoint::Owner => 1,
            Endpoint::Resolved(_, urns) => urns.len(),
        };
        if src_len == 0 || dst_len == 0 {
            debug!(rule = name, "projection empty, rule skipped");
            return Ok(Vec::new());
        }
        let count = src_len.max(dst_len);
        // Singletons broadcast; otherwise lengths must agree index-wise.
        if (src_len != count && src_len != 1) || (dst_len != count && dst_len != 1) {
            return Err(RuleEvaluationError::TypeError {
                rule: name.to_string(),
                path: "extract".to_string(),
                expected: "matching projection cardinality",
                found: "mismatched array lengths",
            });
        }

        // Per-index edge property projections, broadcast like endpoints.
        let mut prop_values: Vec<(String, Vec<Value>)> = Vec::new();
        for (key, raw_path) in &rule.extract.props {
            let path = ProjectionPath::parse(name, raw_path)?;
            let values = path.evaluate(name, payload)?;
            if !values.is_empty() && values.len() != count && values.len() != 1 {
                return Err(RuleEvaluationError::TypeError {
                    rule: name.to_string(),
                    path: raw_path.clone(),
                    expected: "matching projection cardinality",
                    found: "mismatched array lengths",
                });
            }
            prop_values.push((key.clone(), values));
        }

        let pick = |endpoint: &Endpoint, i: usize| -> (String, String, bool) {
            match endpoint {
                Endpoint::Owner => (entity_type.to_string(), urn.to_string(), true),
                Endpoint::Resolved(label, urns) => {
                    let at = if urns.len() == 1 { 0 } else { i };
                    (label.clone(), urns[at].clone(), false)
                }
            }
        };

        let mut edges = Vec::with_capacity(count);
        for i in 0..count {
            let (src_label, src_urn, src_is_owner) = pick(&src, i);
            let (dst_label, dst_urn, dst_is_owner) = pick(&dst, i);

            if src_urn == dst_urn && !rule.allow_self_loops {
                return Err(RuleEvaluationError::SelfLoop {
                    rule: name.to_string(),
                    urn: src_urn,
                });
            }

            // Static edge properties first, projected values on top.
            let mut props: JsonMap = rule
                .edge
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, values) in &prop_values {
                let value = match values.len() {
                    0 => continue,
                    1 => values[0].clone(),
                    _ => values[i].clone(),
                };
                props.insert(key.clone(), value);
            }

            edges.push(PlannedEdge {
                rule: name.to_string(),
                rel_type: rule.edge.rel_type.clone(),
                src_label,
                src_urn,
                src_is_owner,
                dst_label,
                dst_urn,
                dst_is_owner,
                props,
                discriminators: rule.edge.discriminators.clone(),
                auto_create_missing: rule.auto_create_missing,
                via: aspect_name.to_string(),
            });
        }
        Ok(edges)
    }

    fn resolve_endpoint(
        &self,
        name: &str,
        rule: &RelationshipRule,
        selector: &Selector,
        is_source: bool,
        payload: &Value,
    ) -> std::result::Result<Endpoint, RuleEvaluationError> {
        match selector.kind {
            SelectorKind::Owning => Ok(Endpoint::Owner),
            SelectorKind::FromUrn => {
                let label = selector.entity.clone().unwrap_or_default();
                let urns = self.projected_strings(name, rule, is_source, payload)?;
                Ok(Endpoint::Resolved(label, urns))
            }
            SelectorKind::FromParams => {
                let label = selector.entity.clone().unwrap_or_default();
                // Each parameter projects independently; indices align.
                let mut per_param: Vec<(String, Vec<String>)> = Vec::new();
                let mut count = 0usize;
                for (param, raw_path) in &selector.params {
                    let path = ProjectionPath::parse(name, raw_path)?;
                    let values = path.evaluate(name, payload)?;
                    let strings = values
                        .iter()
                        .map(|v| expect_string(name, raw_path, v))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    count = count.max(strings.len());
                    per_param.push((param.clone(), strings));
                }
                if count == 0 {
                    return Ok(Endpoint::Resolved(label, Vec::new()));
                }
                let mut urns = Vec::with_capacity(count);
                for i in 0..count {
                    let mut params = std::collections::BTreeMap::new();
                    for (param, values) in &per_param {
                        let value = match values.len() {
                            0 => continue,
                            1 => values[0].clone(),
                            _ => {
                                if i >= values.len() {
                                    return Err(RuleEvaluationError::TypeError {
                                        rule: name.to_string(),
                                        path: format!("params.{param}"),
                                        expected: "matching projection cardinality",
                                        found: "mismatched array lengths",
                                    });
                                }
                                values[i].clone()
                            }
                        };
                        params.insert(param.clone(), Value::String(value));
                    }
                    let urn = self.urns.build(&label, &params).map_err(|e| {
                        RuleEvaluationError::TypeError {
                            rule: name.to_string(),
                            path: format!("params ({e})"),
                            expected: "complete identifying parameters",
                            found: "missing parameter",
                        }
                    })?;
                    urns.push(urn);
                }
                Ok(Endpoint::Resolved(label, urns))
            }
        }
    }

    fn projected_strings(
        &self,
        name: &str,
        rule: &RelationshipRule,
        is_source: bool,
        payload: &Value,
    ) -> std::result::Result<Vec<String>, RuleEvaluationError> {
        let mut out = Vec::new();
        if is_source {
            let raw = rule.extract.src.as_deref().unwrap_or_default();
            let path = ProjectionPath::parse(name, raw)?;
            for value in path.evaluate(name, payload)? {
                out.push(expect_string(name, raw, &value)?);
            }
        } else {
            for raw in rule.extract.dst.iter() {
                let path = ProjectionPath::parse(name, raw)?;
                for value in path.evaluate(name, payload)? {
                    out.push(expect_string(name, raw, &value)?);
                }
            }
        }
        Ok(out)
    }

    /// Materialize planned edges. Non-owner endpoints missing from the graph
    /// are auto-created URN-only when the rule opts in, and are an error
    /// otherwise.
    pub async fn apply(
        &self,
        writer: &GraphWriter,
        planned: &[PlannedEdge],
    ) -> Result<(Vec<CreatedRelationship>, Vec<CreatedEntity>)> {
        let store = writer.store();
        let mut relationships = Vec::with_capacity(planned.len());
        let mut created_entities = Vec::new();

        for edge in planned {
            for (label, urn, is_owner) in [
                (&edge.src_label, &edge.src_urn, edge.src_is_owner),
                (&edge.dst_label, &edge.dst_urn, edge.dst_is_owner),
            ] {
                if is_owner || store.node_exists(urn).await? {
                    continue;
                }
                if !edge.auto_create_missing {
                    return Err(RuleEvaluationError::MissingDestination {
                        rule: edge.rule.clone(),
                        urn: urn.clone(),
                    }
                    .into());
                }
                writer.upsert_entity(label, urn, &JsonMap::new()).await?;
                created_entities.push(CreatedEntity {
                    entity_type: label.clone(),
                    urn: urn.clone(),
                });
            }

            let outcome = writer
                .create_relationship(&EdgeMergeSpec {
                    src_label: edge.src_label.clone(),
                    src_urn: edge.src_urn.clone(),
                    rel_type: edge.rel_type.clone(),
                    dst_label: edge.dst_label.clone(),
                    dst_urn: edge.dst_urn.clone(),
                    props: edge.props.clone(),
                    discriminators: edge.discriminators.clone(),
                    via: Some(edge.via.clone()),
                })
                .await?;
            relationships.push(CreatedRelationship {
                rel_type: edge.rel_type.clone(),
                src_urn: edge.src_urn.clone(),
                dst_urn: edge.dst_urn.clone(),
                created: outcome == MergeOutcome::Created,
            });
        }
        Ok((relationships, created_entities))
    }
}
