//! Parameter validation against a tool's `InputSchema`.
//!
//! Every offending field is reported, not just the first. Parameters the
//! schema does not declare are passed through untouched.

use crate::descriptor::InputSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: "required parameter is missing".into(),
        }
    }

    fn mismatch(field: &str, expected: &str, got: &Value) -> Self {
        Self {
            field: field.to_string(),
            message: format!("expected {expected}, got {}", json_type_name(got)),
        }
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn validate_parameters(
    schema: &InputSchema,
    params: &Map<String, Value>,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    for name in schema.required_params() {
        match params.get(name) {
            None | Some(Value::Null) => errors.push(FieldError::missing(name)),
            Some(_) => {}
        }
    }

    for (name, spec) in &schema.properties {
        let Some(value) = params.get(name) else { continue };
        // Optional parameters may be sent as explicit null.
        if value.is_null() {
            continue;
        }
        if !spec.param_type.matches(value) {
            errors.push(FieldError::mismatch(name, spec.param_type.as_str(), value));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
