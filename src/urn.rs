//! URN construction from registry templates.
//!
//! A template is literal text with `{param}` placeholders. Substitution is
//! literal with URN-safe escaping of the reserved characters `(` `)` `,` `:`
//! (plus the escape introducer `%`) in substituted values. Same input, same
//! URN, byte for byte.
//!
//! Reverse parsing is exposed only for unambiguous templates: every
//! placeholder must be followed by a non-empty literal whose first character
//! is reserved, so the boundary can never occur inside an escaped value. The
//! final placeholder may run to the end of the URN.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::UrnError;
use crate::registry::Registry;

const RESERVED: [char; 5] = ['%', '(', ')', ',', ':'];

/// Escape reserved characters in a substituted parameter value.
pub fn escape_component(raw: &str) -> String {
    if !raw.contains(RESERVED) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            ',' => out.push_str("%2C"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_component`]. Unknown escape sequences pass through.
pub fn unescape_component(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let bytes = escaped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            match &escaped[i + 1..i + 3] {
                "25" => out.push('%'),
                "28" => out.push('('),
                "29" => out.push(')'),
                "2C" => out.push(','),
                "3A" => out.push(':'),
                _ => {
                    out.push('%');
                    i += 1;
                    continue;
                }
            }
            i += 3;
        } else {
            out.push(escaped[i..].chars().next().unwrap_or('%'));
            i += escaped[i..].chars().next().map_or(1, char::len_utf8);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled URN template for one entity type.
#[derive(Debug, Clone)]
pub struct UrnTemplate {
    entity: String,
    segments: Vec<Segment>,
    reversible: bool,
}

impl UrnTemplate {
    pub fn compile(entity: &str, template: &str) -> Result<Self, UrnError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(pc) if pc.is_alphanumeric() || pc == '_' => name.push(pc),
                            Some(pc) => {
                                return Err(UrnError::MalformedTemplate {
                                    entity: entity.to_string(),
                                    reason: format!("invalid character '{pc}' in placeholder"),
                                })
                            }
                            None => {
                                return Err(UrnError::MalformedTemplate {
                                    entity: entity.to_string(),
                                    reason: "unterminated placeholder".to_string(),
                                })
                            }
                        }
                    }
                    if name.is_empty() {
                        return Err(UrnError::MalformedTemplate {
                            entity: entity.to_string(),
                            reason: "empty placeholder".to_string(),
                        });
                    }
                    segments.push(Segment::Param(name));
                }
                '}' => {
                    return Err(UrnError::MalformedTemplate {
                        entity: entity.to_string(),
                        reason: "unmatched '}'".to_string(),
                    })
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if !segments.iter().any(|s| matches!(s, Segment::Param(_))) {
            return Err(UrnError::MalformedTemplate {
                entity: entity.to_string(),
                reason: "template has no placeholders".to_string(),
            });
        }

        let reversible = Self::check_reversible(&segments);
        Ok(Self {
            entity: entity.to_string(),
            segments,
            reversible,
        })
    }

    /// Unambiguous iff every placeholder is either last or followed by a
    /// literal starting with a reserved character.
    fn check_reversible(segments: &[Segment]) -> bool {
        for (i, seg) in segments.iter().enumerate() {
            if let Segment::Param(_) = seg {
                match segments.get(i + 1) {
                    None => {}
                    Some(Segment::Literal(lit)) => {
                        if !lit.starts_with(RESERVED) {
                            return false;
                        }
                    }
                    Some(Segment::Param(_)) => return false,
                }
            }
        }
        true
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn is_reversible(&self) -> bool {
        self.reversible
    }

    /// Length of the leading literal segment, used to disambiguate which
    /// entity type a URN belongs to.
    fn literal_prefix_len(&self) -> usize {
        match self.segments.first() {
            Some(Segment::Literal(lit)) => lit.len(),
            _ => 0,
        }
    }

    /// Parameter names referenced by the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(p) => Some(p.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Build the URN. Values are stringified (strings verbatim, scalars via
    /// display) and reserved-escaped. A missing or null placeholder value is
    /// a `MissingParam` error.
    pub fn build(&self, params: &BTreeMap<String, Value>) -> Result<String, UrnError> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Param(name) => {
                    let value = params.get(name).and_then(stringify_param).ok_or_else(|| {
                        UrnError::MissingParam {
                            entity: self.entity.clone(),
                            param: name.clone(),
                        }
                    })?;
                    out.push_str(&escape_component(&value));
                }
            }
        }
        Ok(out)
    }

    /// Recover parameter values from a URN produced by [`build`]. Only
    /// available for reversible templates.
    pub fn parse(&self, urn: &str) -> Result<BTreeMap<String, Value>, UrnError> {
        if !self.reversible {
            return Err(UrnError::AmbiguousTemplate {
                entity: self.entity.clone(),
            });
        }
        let mismatch = || UrnError::ParseMismatch {
            entity: self.entity.clone(),
            urn: urn.to_string(),
        };

        let mut rest = urn;
        let mut params = BTreeMap::new();
        let mut i = 0;
        while i < self.segments.len() {
            match &self.segments[i] {
                Segment::Literal(lit) => {
                    rest = rest.strip_prefix(lit.as_str()).ok_or_else(mismatch)?;
                }
                Segment::Param(name) => {
                    let raw = match self.segments.get(i + 1) {
                        None => std::mem::take(&mut rest),
                        Some(Segment::Literal(lit)) => {
                            let at = rest.find(lit.as_str()).ok_or_else(mismatch)?;
                            let (value, tail) = rest.split_at(at);
                            rest = tail;
                            value
                        }
                        // Unreachable for a reversible template.
                        Some(Segment::Param(_)) => return Err(mismatch()),
                    };
                    params.insert(name.clone(), Value::String(unescape_component(raw)));
                }
            }
            i += 1;
        }
        if !rest.is_empty() {
            return Err(mismatch());
        }
        Ok(params)
    }
}

fn stringify_param(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// All compiled builders, keyed by entity type. Built once at boot and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct UrnBuilderSet {
    templates: HashMap<String, UrnTemplate>,
}

impl UrnBuilderSet {
    pub fn from_registry(registry: &Registry) -> Result<Self, UrnError> {
        let mut templates = HashMap::new();
        for entity in registry.entity_types() {
            let def = registry
                .entity(entity)
                .ok_or_else(|| UrnError::MalformedTemplate {
                    entity: entity.to_string(),
                    reason: "entity vanished during compilation".to_string(),
                })?;
            templates.insert(
                entity.to_string(),
                UrnTemplate::compile(entity, &def.urn_template)?,
            );
        }
        Ok(Self { templates })
    }

    pub fn template(&self, entity_type: &str) -> Option<&UrnTemplate> {
        self.templates.get(entity_type)
    }

    pub fn build(
        &self,
        entity_type: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<String, UrnError> {
        let template = self
            .templates
            .get(entity_type)
            .ok_or_else(|| UrnError::MissingParam {
                entity: entity_type.to_string(),
                param: "<entity type not registered>".to_string(),
            })?;
        template.build(params)
    }

    pub fn parse(
        &self,
        entity_type: &str,
        urn: &str,
    ) -> Result<BTreeMap<String, Value>, UrnError> {
        let template = self
            .templates
            .get(entity_type)
            .ok_or_else(|| UrnError::ParseMismatch {
                entity: entity_type.to_string(),
                urn: urn.to_string(),
            })?;
        template.parse(urn)
    }

    /// Identify which entity type a URN belongs to by matching it against
    /// every reversible template. Returns the entity type and the recovered
    /// identifying parameters. Ambiguity across entity types is resolved in
    /// favor of the longest literal prefix.
    pub fn resolve(&self, urn: &str) -> Option<(String, BTreeMap<String, Value>)> {
        let mut best: Option<(usize, String, BTreeMap<String, Value>)> = None;
        for (entity, template) in &self.templates {
            if !template.is_reversible() {
                continue;
            }
            if let Ok(params) = template.parse(urn) {
                let prefix = template.literal_prefix_len();
                let better = best
                    .as_ref()
                    .is_none_or(|(len, _, _)| prefix > *len);
                if better {
                    best = Some((prefix, entity.clone(), params));
                }
            }
        }
        best.map(|(_, entity, params)| (entity, params))
    }
}
