//! Declared parameter schemas and argument validation.
//!
//! Schemas render to the JSON-Schema subset used by function-calling APIs
//! and validate model-supplied arguments before a tool is invoked.

use serde_json::{Map, Value, json};
use thiserror::Error;

/// JSON type of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// Array whose items all have the given scalar type.
    Array(ScalarType),
}

/// Item type for array parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Integer,
}

impl ParamType {
    fn json_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| item.accepts(v))),
        }
    }
}

impl ScalarType {
    fn json_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub description: &'static str,
    pub required: bool,
}

/// Why a set of arguments was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' must be of type {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Object schema with named, typed properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSchema {
    properties: Vec<ParameterSpec>,
}

impl ParameterSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: &'static str, kind: ParamType, description: &'static str) -> Self {
        self.properties.push(ParameterSpec {
            name,
            kind,
            description,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: &'static str, kind: ParamType, description: &'static str) -> Self {
        self.properties.push(ParameterSpec {
            name,
            kind,
            description,
            required: false,
        });
        self
    }

    #[must_use]
    pub fn properties(&self) -> &[ParameterSpec] {
        &self.properties
    }

    /// Render as a JSON-Schema object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.properties {
            let mut property = json!({
                "type": spec.kind.json_name(),
                "description": spec.description,
            });
            if let ParamType::Array(item) = spec.kind {
                property["items"] = json!({ "type": item.json_name() });
            }
            properties.insert(spec.name.to_string(), property);
        }
        let required = self
            .properties
            .iter()
            .filter(|spec| spec.required)
            .map(|spec| spec.name)
            .collect::<Vec<_>>();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `args` against the declared properties.
    ///
    /// `null` counts as an empty object. Undeclared properties are ignored;
    /// `null` values for optional properties count as absent.
    pub fn validate(&self, args: &Value) -> Result<(), SchemaViolation> {
        let empty = Map::new();
        let object = match args {
            Value::Null => &empty,
            Value::Object(object) => object,
            _ => return Err(SchemaViolation::NotAnObject),
        };

        for spec in &self.properties {
            match object.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SchemaViolation::MissingField(spec.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(SchemaViolation::WrongType {
                        field: spec.name,
                        expected: spec.kind.json_name(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
