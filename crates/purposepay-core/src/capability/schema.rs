//! Declared input schemas for capabilities.
//!
//! A schema is an ordered list of parameters. Validation is strict: every
//! required parameter must be present and non-null, every present parameter
//! must have its declared type, required strings must be non-empty, and
//! parameters the schema does not declare are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CapabilityError;

use super::CapabilityInput;

/// JSON type of a capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// Structured value, typically a whole upstream stage output.
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        };
        write!(f, "{s}")
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
        }
    }
}

/// Ordered parameter list for a capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSchema {
    params: Vec<ParamSpec>,
}

impl InputSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check `input` against the schema. Nothing is invoked on failure.
    pub fn validate(
        &self,
        capability: &str,
        input: &CapabilityInput,
    ) -> Result<(), CapabilityError> {
        let invalid = |param: &str, reason: String| CapabilityError::InvalidInput {
            capability: capability.to_string(),
            param: param.to_string(),
            reason,
        };

        for param in &self.params {
            match input.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(invalid(&param.name, "is missing".to_string()));
                    }
                }
                Some(value) => {
                    if !param.ty.matches(value) {
                        return Err(invalid(
                            &param.name,
                            format!("expected {}, got {}", param.ty, json_type_name(value)),
                        ));
                    }
                    if param.required
                        && param.ty == ParamType::String
                        && value.as_str().is_some_and(|s| s.trim().is_empty())
                    {
                        return Err(invalid(&param.name, "must not be empty".to_string()));
                    }
                }
            }
        }

        if let Some(extra) = input.keys().find(|k| self.param(k).is_none()) {
            return Err(invalid(extra, "is not declared by the schema".to_string()));
        }

        Ok(())
    }
}
