use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Authentication scheme declared by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthType {
    Bearer,
    ApiKey,
    Basic,
    Hmac,
    OAuth2,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Bearer => "Bearer",
            AuthType::ApiKey => "ApiKey",
            AuthType::Basic => "Basic",
            AuthType::Hmac => "Hmac",
            AuthType::OAuth2 => "OAuth2",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Any => "any",
        }
    }

    /// Whether a JSON value satisfies this declared type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Any => !matches!(value, Value::Null),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Structural input schema of a tool.
///
/// A parameter is required when its spec says so or when it appears in
/// the top-level `required` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, ParamSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl InputSchema {
    /// Effective required parameter names, sorted and deduplicated.
    pub fn required_params(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .properties
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .chain(self.required.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: InputSchema,
    /// HTTP method used upstream (default POST).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Path relative to the adapter base URL; `{param}` segments are
    /// filled from parameters. Defaults to `/{name}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::default(),
            method: None,
            path: None,
            timeout_ms: None,
        }
    }

    /// Declare a parameter (builder style, used by loaders and tests).
    pub fn param(mut self, name: &str, param_type: ParamType, required: bool) -> Self {
        self.input_schema.properties.insert(
            name.to_string(),
            ParamSpec {
                param_type,
                required,
                description: String::new(),
            },
        );
        self
    }

    pub fn route(mut self, method: &str, path: &str) -> Self {
        self.method = Some(method.to_uppercase());
        self.path = Some(path.to_string());
        self
    }

    pub fn http_method(&self) -> String {
        self.method
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| "POST".to_string())
    }

    pub fn http_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| format!("/{}", self.name))
    }

    fn validate(&self, adapter: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AdapterError::invalid(adapter, "tool name must not be empty"));
        }
        for req in &self.input_schema.required {
            if !self.input_schema.properties.contains_key(req) {
                return Err(AdapterError::invalid(
                    adapter,
                    format!(
                        "tool '{}': required parameter '{req}' is not a declared property",
                        self.name
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Immutable description of one provider integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterDescriptor {
    pub name: String,
    pub version: String,
    pub base_url: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

impl AdapterDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".into(),
            base_url: base_url.into(),
            auth_type,
            description: String::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Check the registration invariants: lowercase-hyphenated non-empty
    /// name, unique tool names, `required ⊆ properties` for every tool.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AdapterError::invalid("", "adapter name must not be empty"));
        }
        if !is_valid_name(&self.name) {
            return Err(AdapterError::invalid(
                &self.name,
                "adapter name must be lowercase-hyphenated",
            ));
        }
        let mut seen = HashSet::with_capacity(self.tools.len());
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(AdapterError::invalid(
                    &self.name,
                    format!("duplicate tool name '{}'", tool.name),
                ));
            }
            tool.validate(&self.name)?;
        }
        Ok(())
    }

    /// BLAKE3 fingerprint of the canonical JSON form (`b3:<hex>`).
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("b3:{}", hex::encode(blake3::hash(&bytes).as_bytes()))
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paystack() -> AdapterDescriptor {
        AdapterDescriptor::new("paystack-api", "https://api.paystack.co", AuthType::Bearer).with_tool(
            ToolDescriptor::new("verify_transaction", "Verify a transaction")
                .param("reference", ParamType::String, true)
                .route("GET", "/transaction/verify/{reference}"),
        )
    }

    #[test]
    fn valid_descriptor_passes() {
        assert!(paystack().validate().is_ok());
    }

    #[test]
    fn rejects_empty_and_malformed_names() {
        let mut d = paystack();
        d.name = String::new();
        assert!(d.validate().is_err());
        d.name = "Paystack_API".into();
        assert!(d.validate().is_err());
        d.name = "-paystack".into();
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_tools() {
        let d = paystack().with_tool(ToolDescriptor::new("verify_transaction", "again"));
        let err = d.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate tool name"), "{err}");
    }

    #[test]
    fn rejects_required_outside_properties() {
        let mut tool = ToolDescriptor::new("charge", "");
        tool.input_schema.required.push("amount".into());
        let d = AdapterDescriptor::new("stripe-api", "https://api.stripe.com", AuthType::Bearer)
            .with_tool(tool);
        assert!(d.validate().is_err());
    }

    #[test]
    fn required_params_merges_both_forms() {
        let mut tool = ToolDescriptor::new("charge", "")
            .param("amount", ParamType::Integer, true)
            .param("currency", ParamType::String, false);
        tool.input_schema.required.push("currency".into());
        tool.input_schema.required.push("amount".into());
        assert_eq!(tool.input_schema.required_params(), vec!["amount", "currency"]);
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = paystack();
        assert_eq!(a.fingerprint(), paystack().fingerprint());
        assert!(a.fingerprint().starts_with("b3:"));
        let mut b = paystack();
        b.version = "2.0.0".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn deserializes_generated_artifact() {
        let raw = json!({
            "name": "stripe-api",
            "version": "2024-06-20",
            "baseUrl": "https://api.stripe.com/v1",
            "authType": "Bearer",
            "tools": [{
                "name": "create_customer",
                "description": "Create a customer",
                "inputSchema": {
                    "properties": {
                        "email": {"type": "string", "description": "Email"},
                        "metadata": {"type": "object"}
                    },
                    "required": ["email"]
                },
                "method": "POST",
                "path": "/customers"
            }]
        });
        let d: AdapterDescriptor = serde_json::from_value(raw).unwrap();
        assert!(d.validate().is_ok());
        let tool = d.tool("create_customer").unwrap();
        assert_eq!(tool.input_schema.required_params(), vec!["email"]);
        assert_eq!(tool.http_path(), "/customers");
    }

    #[test]
    fn default_route_uses_tool_name() {
        let tool = ToolDescriptor::new("get_insights", "");
        assert_eq!(tool.http_method(), "POST");
        assert_eq!(tool.http_path(), "/get_insights");
    }
}
