//! Operation synthesis from the registry.
//!
//! At boot the synthesizer walks the registry and emits a static table of
//! operation descriptors: for each entity type the triplet
//! `{upsert_<entity>, get_<entity>, delete_<entity>}`, and for each aspect
//! `{upsert_<aspect>_aspect, get_<aspect>_aspect, delete_<aspect>_aspect}`.
//! Transport layers index the table by name; no per-request reflection
//! happens anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CatalogError, Result, ValidationError};
use crate::lineage::LineageTemplateResolver;
use crate::registry::{AspectKind, Registry};
use crate::rules::{CreatedEntity, CreatedRelationship, PlannedEdge, RuleEngine};
use crate::store::JsonMap;
use crate::urn::UrnBuilderSet;
use crate::writer::GraphWriter;

/// What a synthesized operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    UpsertEntity,
    GetEntity,
    DeleteEntity,
    UpsertAspect,
    GetAspect,
    DeleteAspect,
}

/// Static descriptor bound at boot: everything an op needs to run without
/// consulting configuration again.
#[derive(Debug, Clone, Serialize)]
pub struct OpDescriptor {
    pub name: String,
    pub kind: OpKind,
    /// Target entity type for entity ops; absent for aspect ops (the
    /// declaring entity is resolved per request).
    pub entity_type: Option<String>,
    pub aspect_name: Option<String>,
    pub aspect_kind: Option<AspectKind>,
    /// Entity types declaring the aspect; singular means requests may omit
    /// `entity_type`.
    pub declaring_entities: Vec<String>,
    /// Identifying params a caller must supply when not passing a URN.
    pub required_params: Vec<String>,
    /// Relationship rules (by declaration index) this op can trigger.
    pub rule_bindings: Vec<usize>,
}

/// Caller-supplied arguments. Transports deserialize their request bodies
/// straight into this.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpRequest {
    /// Owning entity type, required for aspect ops when the aspect is
    /// declared on more than one entity type.
    pub entity_type: Option<String>,
    /// Explicit URN; alternative to `params`.
    pub entity_urn: Option<String>,
    /// Identifying (and optional) parameters of the entity.
    #[serde(default)]
    pub params: JsonMap,
    /// Aspect payload for upsert-aspect ops.
    pub payload: Option<Value>,
    /// Time-series timestamp; defaults to now.
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub cascade: bool,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub limit: Option<usize>,
}

/// Structured result of a write operation.
#[derive(Debug, Clone, Serialize, Default)]
pub struct WriteOutcome {
    pub urn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Set when the op materialized the owning entity on the fly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_entity: Option<CreatedEntity>,
    pub created_relationships: Vec<CreatedRelationship>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub urn: String,
    pub entity_type: String,
    pub params: JsonMap,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AspectView {
    pub urn: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    pub payload: Value,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OpOutput {
    Write(WriteOutcome),
    Entity { entity: Option<EntityView> },
    Aspect { aspect: Option<AspectView> },
    Timeseries { rows: Vec<AspectView> },
    Deleted { urn: String, removed: usize },
}

pub struct OperationSynthesizer;

impl OperationSynthesizer {
    /// Walk the registry and produce the full operation table.
    pub fn synthesize(
        registry: Arc<Registry>,
        writer: Arc<GraphWriter>,
    ) -> Result<OperationTable> {
        let urns = Arc::new(UrnBuilderSet::from_registry(&registry)?);
        let rules = RuleEngine::new(registry.clone(), urns.clone());
        let lineage = LineageTemplateResolver::new(registry.clone(), urns.clone());

        let mut ops = HashMap::new();
        for entity_type in registry.entity_types() {
            let def = registry.entity(entity_type).ok_or_else(|| {
                CatalogError::Validation(ValidationError::UnknownEntity(entity_type.to_string()))
            })?;
            let lower = entity_type.to_lowercase();
            for (kind, name) in [
                (OpKind::UpsertEntity, format!("upsert_{lower}")),
                (OpKind::GetEntity, format!("get_{lower}")),
                (OpKind::DeleteEntity, format!("delete_{lower}")),
            ] {
                ops.insert(
                    name.clone(),
                    OpDescriptor {
                        name,
                        kind,
                        entity_type: Some(entity_type.to_string()),
                        aspect_name: None,
                        aspect_kind: None,
                        declaring_entities: Vec::new(),
                        required_params: def.identifying_params.clone(),
                        rule_bindings: Vec::new(),
                    },
                );
            }
        }

        for aspect_name in registry.aspect_names() {
            let aspect_kind = registry.aspect_kind(aspect_name);
            let declaring: Vec<String> = registry
                .entity_types()
                .filter(|e| {
                    registry
                        .entity(e)
                        .is_some_and(|def| def.aspects.contains_key(aspect_name))
                })
                .map(str::to_string)
                .collect();
            let required_params = match declaring.as_slice() {
                [single] => registry
                    .entity(single)
                    .map(|def| def.identifying_params.clone())
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            let rule_bindings: Vec<usize> = registry
                .relationship_rules_for(aspect_name)
                .map(|(i, _)| i)
                .collect();
            let lower = aspect_name.to_lowercase();
            for (kind, name) in [
                (OpKind::UpsertAspect, format!("upsert_{lower}_aspect")),
                (OpKind::GetAspect, format!("get_{lower}_aspect")),
                (OpKind::DeleteAspect, format!("delete_{lower}_aspect")),
            ] {
                ops.insert(
                    name.clone(),
                    OpDescriptor {
                        name,
                        kind,
                        entity_type: None,
                        aspect_name: Some(aspect_name.to_string()),
                        aspect_kind,
                        declaring_entities: declaring.clone(),
                        required_params: required_params.clone(),
                        rule_bindings: rule_bindings.clone(),
                    },
                );
            }
        }

        info!(operations = ops.len(), "operation table synthesized");
        Ok(OperationTable {
            registry,
            writer,
            urns,
            rules,
            lineage,
            ops,
        })
    }
}

/// The immutable, boot-time operation table. This is the stable surface
/// transport layers call.
pub struct OperationTable {
    registry: Arc<Registry>,
    writer: Arc<GraphWriter>,
    urns: Arc<UrnBuilderSet>,
    rules: RuleEngine,
    lineage: LineageTemplateResolver,
    ops: HashMap<String, OpDescriptor>,
}

impl OperationTable {
    /// All operation names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn descriptor(&self, name: &str) -> Option<&OpDescriptor> {
        self.ops.get(name)
    }

    pub fn urns(&self) -> &UrnBuilderSet {
        &self.urns
    }

    /// Run a synthesized operation by name.
    pub async fn execute(&self, name: &str, request: OpRequest) -> Result<OpOutput> {
        let descriptor = self.ops.get(name).ok_or_else(|| CatalogError::NotFound {
            kind: "operation".to_string(),
            urn: name.to_string(),
        })?;
        debug!(op = name, "executing synthesized operation");
        match descriptor.kind {
            OpKind::UpsertEntity => self.upsert_entity(descriptor, request).await,
            OpKind::GetEntity => self.get_entity(descriptor, request).await,
            OpKind::DeleteEntity => self.delete_entity(descriptor, request).await,
            OpKind::UpsertAspect => self.upsert_aspect(descriptor, request).await,
            OpKind::GetAspect => self.get_aspect(descriptor, request).await,
            OpKind::DeleteAspect => self.delete_aspect(descriptor, request).await,
        }
    }

    fn entity_of(&self, descriptor: &OpDescriptor) -> String {
        descriptor.entity_type.clone().unwrap_or_default()
    }

    /// Owning entity type for an aspect op: explicit in the request, or
    /// unambiguous from the registry.
    fn owning_entity(&self, descriptor: &OpDescriptor, request: &OpRequest) -> Result<String> {
        if let Some(entity_type) = &request.entity_type {
            if !descriptor.declaring_entities.iter().any(|e| e == entity_type) {
                return Err(ValidationError::UnknownAspect {
                    entity: entity_type.clone(),
                    aspect: descriptor.aspect_name.clone().unwrap_or_default(),
                }
                .into());
            }
            return Ok(entity_type.clone());
        }
        match descriptor.declaring_entities.as_slice() {
            [single] => Ok(single.clone()),
            [] => Err(ValidationError::UnknownAspect {
                entity: "<none>".to_string(),
                aspect: descriptor.aspect_name.clone().unwrap_or_default(),
            }
            .into()),
            _ => Err(ValidationError::UnknownEntity(
                "entity_type is required: aspect is declared on multiple entity types".to_string(),
            )
            .into()),
        }
    }

    fn resolve_urn(&self, entity_type: &str, request: &OpRequest) -> Result<String> {
        if let Some(urn) = &request.entity_urn {
            return Ok(urn.clone());
        }
        let params: std::collections::BTreeMap<String, Value> = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(self.urns.build(entity_type, &params)?)
    }

    async fn upsert_entity(
        &self,
        descriptor: &OpDescriptor,
        request: OpRequest,
    ) -> Result<OpOutput> {
        let entity_type = self.entity_of(descriptor);
        let urn = self.resolve_urn(&entity_type, &request)?;
        let existed = self.writer.store().node_exists(&urn).await?;
        self.writer
            .upsert_entity(&entity_type, &urn, &request.params)
            .await?;
        Ok(OpOutput::Write(WriteOutcome {
            created_entity: (!existed).then(|| CreatedEntity {
                entity_type: entity_type.clone(),
                urn: urn.clone(),
            }),
            urn,
            ..WriteOutcome::default()
        }))
    }

    async fn get_entity(&self, descriptor: &OpDescriptor, request: OpRequest) -> Result<OpOutput> {
        let entity_type = self.entity_of(descriptor);
        let urn = self.resolve_urn(&entity_type, &request)?;
        let entity = self
            .writer
            .get_entity(&entity_type, &urn)
            .await?
            .map(|node| EntityView {
                urn: node.urn,
                entity_type: node.label,
                params: node.props,
                updated_at_ms: node.updated_at_ms,
            });
        Ok(OpOutput::Entity { entity })
    }

    async fn delete_entity(
        &self,
        descriptor: &OpDescriptor,
        request: OpRequest,
    ) -> Result<OpOutput> {
        let entity_type = self.entity_of(descriptor);
        let urn = self.resolve_urn(&entity_type, &request)?;
        self.writer
            .delete_entity(&entity_type, &urn, request.cascade)
            .await?;
        Ok(OpOutput::Deleted { urn, removed: 1 })
    }

    async fn upsert_aspect(
        &self,
        descriptor: &OpDescriptor,
        request: OpRequest,
    ) -> Result<OpOutput> {
        let aspect_name = descriptor.aspect_name.clone().unwrap_or_default();
        let entity_type = self.owning_entity(descriptor, &request)?;
        let urn = self.resolve_urn(&entity_type, &request)?;
        let payload = request.payload.clone().unwrap_or(Value::Null);

        // Everything that can fail on the payload alone fails here, before
        // any write: aspect validation, then rule and lineage projection.
        let kind = descriptor.aspect_kind.ok_or_else(|| {
            CatalogError::Validation(ValidationError::UnknownAspect {
                entity: entity_type.clone(),
                aspect: aspect_name.clone(),
            })
        })?;
        self.writer
            .validate_aspect(&entity_type, &aspect_name, &payload, kind)?;
        let mut planned: Vec<PlannedEdge> =
            self.rules.plan(&entity_type, &urn, &aspect_name, &payload)?;
        if self.lineage.applies_to(&payload) {
            planned.extend(
                self.lineage
                    .plan(&entity_type, &urn, &aspect_name, &payload)?,
            );
        }

        // Materialize the owning entity when only params were supplied.
        let mut created_entity = None;
        if !self.writer.store().node_exists(&urn).await? {
            if request.entity_urn.is_some() {
                return Err(CatalogError::NotFound {
                    kind: entity_type.clone(),
                    urn: urn.clone(),
                });
            }
            self.writer
                .upsert_entity(&entity_type, &urn, &request.params)
                .await?;
            created_entity = Some(CreatedEntity {
                entity_type: entity_type.clone(),
                urn: urn.clone(),
            });
        }

        let (version, timestamp) = match kind {
            AspectKind::Versioned => {
                let version = self
                    .writer
                    .upsert_versioned_aspect(&entity_type, &urn, &aspect_name, &payload)
                    .await?;
                (Some(version), None)
            }
            AspectKind::Timeseries => {
                let ts = self
                    .writer
                    .append_timeseries_aspect(
                        &entity_type,
                        &urn,
                        &aspect_name,
                        &payload,
                        request.timestamp_ms,
                    )
                    .await?;
                (None, Some(ts))
            }
        };

        let (created_relationships, _auto_created) =
            self.rules.apply(&self.writer, &planned).await?;

        Ok(OpOutput::Write(WriteOutcome {
            urn,
            version,
            timestamp,
            created_entity,
            created_relationships,
        }))
    }

    async fn get_aspect(&self, descriptor: &OpDescriptor, request: OpRequest) -> Result<OpOutput> {
        let aspect_name = descriptor.aspect_name.clone().unwrap_or_default();
        let entity_type = self.owning_entity(descriptor, &request)?;
        let urn = self.resolve_urn(&entity_type, &request)?;
        match descriptor.aspect_kind {
            Some(AspectKind::Timeseries) => {
                let rows = self
                    .writer
                    .get_timeseries_range(
                        &entity_type,
                        &urn,
                        &aspect_name,
                        request.from_ms,
                        request.to_ms,
                        request.limit.unwrap_or(100),
                    )
                    .await?
                    .into_iter()
                    .map(|row| AspectView {
                        urn: urn.clone(),
                        name: row.name,
                        version: None,
                        timestamp_ms: Some(row.timestamp_ms),
                        payload: row.payload,
                        created_at_ms: row.created_at_ms,
                    })
                    .collect();
                Ok(OpOutput::Timeseries { rows })
            }
            _ => {
                let aspect = self
                    .writer
                    .get_latest_versioned_aspect(&entity_type, &urn, &aspect_name)
                    .await?
                    .map(|record| AspectView {
                        urn: urn.clone(),
                        name: record.name,
                        version: Some(record.version),
                        timestamp_ms: None,
                        payload: record.payload,
                        created_at_ms: record.created_at_ms,
                    });
                Ok(OpOutput::Aspect { aspect })
            }
        }
    }

    async fn delete_aspect(
        &self,
        descriptor: &OpDescriptor,
        request: OpRequest,
    ) -> Result<OpOutput> {
        let aspect_name = descriptor.aspect_name.clone().unwrap_or_default();
        let entity_type = self.owning_entity(descriptor, &request)?;
        let urn = self.resolve_urn(&entity_type, &request)?;
        let removed = self
            .writer
            .delete_aspect(&entity_type, &urn, &aspect_name)
            .await?;
        Ok(OpOutput::Deleted { urn, removed })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
