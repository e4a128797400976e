//! Typed tool parameter schemas.
//!
//! A [`ToolSpec`] declares a tool by name with named, typed parameters.
//! It renders to the JSON Schema shape the provider wire format expects,
//! and backs the dispatcher's argument validation.

use serde_json::Value;

use cd_domain::message::ToolDefinition;

/// Parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn json_name(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }
}

/// One named tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self { name: name.into(), kind, description: description.into(), required: true }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self { name: name.into(), kind, description: description.into(), required: false }
    }
}

/// A tool declaration: unique name, description, typed parameters.
///
/// Static after registration. The registry never validates arguments;
/// that is the dispatcher's job, via [`ToolSpec::validate_args`].
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), params: Vec::new() }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Render the provider-facing definition (JSON Schema parameters).
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.kind.json_name(),
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Check a caller-supplied argument object against this spec.
    ///
    /// Missing required fields are reported before type mismatches.
    /// Extra fields are tolerated (models pad arguments freely).
    pub fn validate_args(&self, arguments: &Value) -> Result<(), ArgumentError> {
        let Some(object) = arguments.as_object() else {
            return Err(ArgumentError::NotAnObject);
        };

        for p in &self.params {
            match object.get(&p.name) {
                None | Some(Value::Null) => {
                    if p.required {
                        return Err(ArgumentError::Missing { field: p.name.clone() });
                    }
                }
                Some(value) => {
                    if !p.kind.matches(value) {
                        return Err(ArgumentError::WrongType {
                            field: p.name.clone(),
                            expected: p.kind.json_name(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// An argument-validation failure, pointing at the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    NotAnObject,
    Missing { field: String },
    WrongType { field: String, expected: &'static str },
}

impl ArgumentError {
    /// The field name the dispatcher reports back to the model.
    pub fn field(&self) -> &str {
        match self {
            ArgumentError::NotAnObject => "arguments",
            ArgumentError::Missing { field } => field,
            ArgumentError::WrongType { field, .. } => field,
        }
    }
}

impl std::fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentError::NotAnObject => write!(f, "arguments must be a JSON object"),
            ArgumentError::Missing { field } => write!(f, "missing required field '{field}'"),
            ArgumentError::WrongType { field, expected } => {
                write!(f, "field '{field}' must be of type {expected}")
            }
        }
    }
}
