//! Parameter schemas for remote tools.
//!
//! MCP servers describe tool inputs with JSON Schema. [`ParamSchema`]
//! keeps the subset the host understands (strings, numbers, booleans,
//! arrays, objects) and maps everything else to [`SchemaKind::Any`], so
//! conversion never fails. The normalised schema is what the host sees as
//! the tool's parameters and what arguments are validated against.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Argument validation failure, located by a JSON path such as `$.items[2].name`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The value has the wrong JSON type.
    #[error("{path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A required object field is absent.
    #[error("{path}: required field is missing")]
    MissingField { path: String },
}

impl SchemaError {
    /// Where in the arguments the failure is.
    pub fn path(&self) -> &str {
        match self {
            Self::TypeMismatch { path, .. } | Self::MissingField { path } => path,
        }
    }
}

/// The shape of one schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String,
    Number {
        /// Declared as `integer` rather than `number`.
        integer: bool,
    },
    Boolean,
    Array(Box<ParamSchema>),
    Object {
        properties: BTreeMap<String, ParamSchema>,
        /// Always a subset of `properties`' keys.
        required: BTreeSet<String>,
    },
    /// Anything goes: missing, unknown or unsupported type declarations.
    Any,
}

/// A normalised parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    pub kind: SchemaKind,
    pub description: Option<String>,
}

impl ParamSchema {
    /// A schema of `kind` without description.
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    /// The schema that accepts everything.
    pub fn any() -> Self {
        Self::new(SchemaKind::Any)
    }

    /// An object schema with no declared properties.
    pub fn empty_object() -> Self {
        Self::new(SchemaKind::Object {
            properties: BTreeMap::new(),
            required: BTreeSet::new(),
        })
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Convert a JSON Schema document. Never fails.
    pub fn from_json(schema: &Value) -> Self {
        let Some(node) = schema.as_object() else {
            return Self::any();
        };

        let description = node
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let kind = match node.get("type").and_then(Value::as_str) {
            Some("string") => SchemaKind::String,
            Some("number") => SchemaKind::Number { integer: false },
            Some("integer") => SchemaKind::Number { integer: true },
            Some("boolean") => SchemaKind::Boolean,
            Some("array") => SchemaKind::Array(Box::new(
                node.get("items").map(Self::from_json).unwrap_or_else(Self::any),
            )),
            Some("object") => object_kind(node),
            _ => SchemaKind::Any,
        };

        Self { kind, description }
    }

    /// Whether this is an object schema.
    pub fn is_object(&self) -> bool {
        matches!(self.kind, SchemaKind::Object { .. })
    }

    /// Check `value` against this schema.
    ///
    /// Optional fields may be absent or `null`; fields the schema does not
    /// declare are allowed.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let mismatch = |expected: &'static str| SchemaError::TypeMismatch {
            path: path.to_string(),
            expected,
            actual: json_type(value),
        };

        match &self.kind {
            SchemaKind::Any => Ok(()),
            SchemaKind::String if value.is_string() => Ok(()),
            SchemaKind::String => Err(mismatch("string")),
            SchemaKind::Number { .. } if value.is_number() => Ok(()),
            SchemaKind::Number { integer: true } => Err(mismatch("integer")),
            SchemaKind::Number { integer: false } => Err(mismatch("number")),
            SchemaKind::Boolean if value.is_boolean() => Ok(()),
            SchemaKind::Boolean => Err(mismatch("boolean")),
            SchemaKind::Array(items) => {
                let elements = value.as_array().ok_or_else(|| mismatch("array"))?;
                for (i, element) in elements.iter().enumerate() {
                    items.validate_at(element, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
            SchemaKind::Object {
                properties,
                required,
            } => {
                let fields = value.as_object().ok_or_else(|| mismatch("object"))?;
                for (name, property) in properties {
                    let field_path = format!("{}.{}", path, name);
                    match fields.get(name) {
                        None if required.contains(name) => {
                            return Err(SchemaError::MissingField { path: field_path })
                        }
                        None => {}
                        Some(Value::Null) if !required.contains(name) => {}
                        Some(field) => property.validate_at(field, &field_path)?,
                    }
                }
                Ok(())
            }
        }
    }

    /// Render back to JSON Schema.
    pub fn to_json_schema(&self) -> Value {
        let mut node = match &self.kind {
            SchemaKind::String => json!({"type": "string"}),
            SchemaKind::Number { integer: true } => json!({"type": "integer"}),
            SchemaKind::Number { integer: false } => json!({"type": "number"}),
            SchemaKind::Boolean => json!({"type": "boolean"}),
            SchemaKind::Array(items) => json!({"type": "array", "items": items.to_json_schema()}),
            SchemaKind::Object {
                properties,
                required,
            } => {
                let properties: Map<String, Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_json_schema()))
                    .collect();
                let mut node = json!({"type": "object", "properties": properties});
                if !required.is_empty() {
                    node["required"] = json!(required);
                }
                node
            }
            SchemaKind::Any => json!({}),
        };

        if let Some(description) = &self.description {
            node["description"] = Value::String(description.clone());
        }
        node
    }

    /// Render as a tool parameter schema, which must be an object.
    ///
    /// A non-object root becomes an empty object schema.
    pub fn to_parameters_schema(&self) -> Value {
        if self.is_object() {
            self.to_json_schema()
        } else {
            Self::empty_object().to_json_schema()
        }
    }
}

fn object_kind(node: &Map<String, Value>) -> SchemaKind {
    let properties: BTreeMap<String, ParamSchema> = node
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| (name.clone(), ParamSchema::from_json(schema)))
                .collect()
        })
        .unwrap_or_default();

    let required = node
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| properties.contains_key(*name))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    SchemaKind::Object {
        properties,
        required,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
