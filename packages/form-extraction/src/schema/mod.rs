//! Declarative schema specifications.
//!
//! A schema file lists required/optional fields, types, enums, whether
//! undeclared fields are allowed, cross-reference rules between collections,
//! and optionally the confidence rubric used to score candidates.
//!
//! ```json
//! {
//!   "id": "iep",
//!   "additional_properties": false,
//!   "fields": {
//!     "student": { "type": "object", "required": true, "critical": true,
//!                  "fields": { "name": { "type": "string", "required": true, "critical": true } } },
//!     "goals": { "type": "array", "required": true,
//!                "items": { "type": "object", "fields": { "goal_number": { "type": "integer", "required": true } } } },
//!     "services": { "type": "array",
//!                   "items": { "type": "object", "fields": { "goal_number": { "type": "integer" } } } }
//!   },
//!   "cross_references": [
//!     { "source": "services", "field": "goal_number", "target": "goals", "key": "goal_number" }
//!   ]
//! }
//! ```

pub mod validator;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{SchemaError, SchemaResult};
use crate::pipeline::scoring::Rubric;

pub use validator::{validate, IssueKind, Severity, ValidationIssue, ValidationReport};

/// Declared value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    /// Whether a non-null value has this type. Whole-valued floats count as integers.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn json_schema_name(&self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Object => Some("object"),
            Self::Array => Some("array"),
            Self::Any => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_schema_name().unwrap_or("any"))
    }
}

/// Name of the JSON type a value actually has.
pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declaration of one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Must be present and non-null.
    #[serde(default)]
    pub required: bool,

    /// Absence makes the whole record invalid.
    #[serde(default)]
    pub critical: bool,

    /// Allowed values.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    /// Sub-fields of an object.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, FieldSpec>,

    /// Item declaration of an array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSpec>>,

    /// Per-object override of the schema-level `additional_properties`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,

    /// Strings shorter than this are flagged as likely truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    /// Create a field of the given type with no constraints.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            critical: false,
            allowed: None,
            fields: IndexMap::new(),
            items: None,
            additional_properties: None,
            min_length: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as required and critical.
    pub fn critical(mut self) -> Self {
        self.required = true;
        self.critical = true;
        self
    }

    pub fn with_enum(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn with_items(mut self, spec: FieldSpec) -> Self {
        self.items = Some(Box::new(spec));
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn with_additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = Some(allowed);
        self
    }

    fn to_json_schema(&self, default_additional: bool) -> Value {
        let mut schema = serde_json::Map::new();

        if let Some(name) = self.field_type.json_schema_name() {
            if self.required {
                schema.insert("type".into(), json!(name));
            } else {
                schema.insert("type".into(), json!([name, "null"]));
            }
        }
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(allowed) = &self.allowed {
            let mut values = allowed.clone();
            if !self.required {
                values.push(Value::Null);
            }
            schema.insert("enum".into(), Value::Array(values));
        }

        match self.field_type {
            FieldType::Object => {
                let additional = self.additional_properties.unwrap_or(default_additional);
                let (properties, required) = object_schema(&self.fields, additional);
                schema.insert("properties".into(), properties);
                schema.insert("required".into(), required);
                schema.insert("additionalProperties".into(), json!(additional));
            }
            FieldType::Array => {
                if let Some(items) = &self.items {
                    schema.insert("items".into(), items.to_json_schema(default_additional));
                }
            }
            _ => {}
        }

        Value::Object(schema)
    }
}

fn object_schema(fields: &IndexMap<String, FieldSpec>, default_additional: bool) -> (Value, Value) {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(name, spec)| (name.clone(), spec.to_json_schema(default_additional)))
        .collect();
    let required: Vec<Value> = fields
        .iter()
        .filter(|(_, spec)| spec.required)
        .map(|(name, _)| json!(name))
        .collect();
    (Value::Object(properties), Value::Array(required))
}

/// Foreign-key-like rule between two collections.
///
/// Every non-null `source[*].field` (scalar or array of scalars) must match
/// some `target[*].key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossReference {
    pub source: String,
    pub field: String,
    pub target: String,
    pub key: String,
}

impl CrossReference {
    pub fn new(
        source: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            field: field.into(),
            target: target.into(),
            key: key.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A complete schema specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether undeclared fields are allowed by default.
    #[serde(default = "default_true")]
    pub additional_properties: bool,

    /// Top-level fields, in declaration order.
    pub fields: IndexMap<String, FieldSpec>,

    #[serde(default)]
    pub cross_references: Vec<CrossReference>,

    /// Confidence rubric; derived from `fields` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<Rubric>,
}

impl SchemaSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            additional_properties: true,
            fields: IndexMap::new(),
            cross_references: Vec::new(),
            scoring: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn forbid_additional(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    pub fn with_cross_reference(mut self, rule: CrossReference) -> Self {
        self.cross_references.push(rule);
        self
    }

    pub fn with_scoring(mut self, rubric: Rubric) -> Self {
        self.scoring = Some(rubric);
        self
    }

    /// Parse and check a schema from JSON text.
    pub fn from_json_str(text: &str) -> SchemaResult<Self> {
        let spec: SchemaSpec = serde_json::from_str(text)?;
        spec.check()?;
        Ok(spec)
    }

    /// Load and check a schema file.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// The rubric used to score candidates for this schema.
    pub fn rubric(&self) -> Rubric {
        self.scoring
            .clone()
            .unwrap_or_else(|| Rubric::derive_from(self))
    }

    /// Resolve a dotted path of object keys to its declaration.
    pub fn declared(&self, path: &str) -> Option<&FieldSpec> {
        let mut parts = path.split('.');
        let mut spec = self.fields.get(parts.next()?)?;
        for part in parts {
            spec = spec.fields.get(part)?;
        }
        Some(spec)
    }

    /// Required top-level keys missing from `tree` (null values count as present).
    pub fn missing_top_level_keys(&self, tree: &Value) -> Vec<String> {
        let map = tree.as_object();
        self.fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .filter(|(name, _)| map.map(|m| !m.contains_key(name.as_str())).unwrap_or(true))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Render as a JSON Schema document for structured-output providers.
    pub fn to_json_schema(&self) -> Value {
        let (properties, required) = object_schema(&self.fields, self.additional_properties);
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.additional_properties,
        })
    }

    /// Check internal consistency: non-empty id and fields, resolvable
    /// cross-reference paths, and a well-formed rubric.
    pub fn check(&self) -> SchemaResult<()> {
        let invalid = |reason: String| SchemaError::Invalid {
            schema_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("schema id is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(invalid("schema declares no fields".into()));
        }

        for rule in &self.cross_references {
            for (collection, member) in [(&rule.source, &rule.field), (&rule.target, &rule.key)] {
                let spec = self
                    .declared(collection)
                    .ok_or_else(|| invalid(format!("cross reference names undeclared collection '{}'", collection)))?;
                if spec.field_type != FieldType::Array {
                    return Err(invalid(format!("cross reference collection '{}' is not an array", collection)));
                }
                let declares_member = spec
                    .items
                    .as_ref()
                    .map(|items| items.fields.contains_key(member.as_str()))
                    .unwrap_or(false);
                if !declares_member {
                    return Err(invalid(format!(
                        "cross reference field '{}' is not declared on items of '{}'",
                        member, collection
                    )));
                }
            }
        }

        if let Some(rubric) = &self.scoring {
            rubric.check().map_err(invalid)?;
        }

        Ok(())
    }
}

/// Schemas loaded at startup, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<SchemaSpec>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any with the same id.
    pub fn insert(&mut self, spec: SchemaSpec) -> Arc<SchemaSpec> {
        let spec = Arc::new(spec);
        self.schemas.insert(spec.id.clone(), spec.clone());
        spec
    }

    /// Builder-style registration.
    pub fn with_schema(mut self, spec: SchemaSpec) -> Self {
        self.insert(spec);
        self
    }

    /// Load a schema file and register it.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> SchemaResult<Arc<SchemaSpec>> {
        let spec = SchemaSpec::from_file(path)?;
        Ok(self.insert(spec))
    }

    pub fn get(&self, id: &str) -> Option<Arc<SchemaSpec>> {
        self.schemas.get(id).cloned()
    }

    pub fn resolve(&self, id: &str) -> SchemaResult<Arc<SchemaSpec>> {
        self.get(id).ok_or_else(|| SchemaError::Unknown(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.schemas.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SchemaSpec>> {
        self.schemas.values()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
