use crate::descriptor::{AdapterDescriptor, ToolDescriptor};
use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A fully built upstream call, before and after credential injection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingRequest {
    /// HTTP method (GET, POST, etc.)
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute target URL, query string included
    pub url: String,
    /// Request headers (sorted by key)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Serialized request body
    #[serde(default)]
    pub body: Option<String>,
    /// Per-attempt deadline in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_method() -> String {
    "GET".into()
}
fn default_timeout() -> u64 {
    10_000
}

impl OutgoingRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: default_timeout(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Path and query component of the URL (`/` when the URL has none).
    pub fn path(&self) -> &str {
        let rest = match self.url.find("://") {
            Some(i) => &self.url[i + 3..],
            None => self.url.as_str(),
        };
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => "/",
        }
    }

    pub fn body_str(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// What the provider answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or the raw text as a JSON string.
    pub body: Value,
}

impl UpstreamResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn from_bytes(status: u16, headers: BTreeMap<String, String>, bytes: &[u8]) -> Self {
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
        };
        Self { status, headers, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx answers are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        self.status >= 500
    }
}

/// Build the upstream call for one tool invocation.
///
/// `{param}` segments in the tool path are filled (URL-encoded) and
/// consumed. Remaining parameters go to the query string for GET/DELETE
/// and to a JSON body otherwise.
pub fn build_request(
    adapter: &AdapterDescriptor,
    tool: &ToolDescriptor,
    params: &Map<String, Value>,
    default_timeout_ms: u64,
) -> Result<OutgoingRequest> {
    let method = tool.http_method();
    let mut remaining = params.clone();
    let path = fill_path(&tool.http_path(), &mut remaining)?;

    let base = adapter.base_url.trim_end_matches('/');
    let sep = if path.starts_with('/') { "" } else { "/" };
    let mut url = format!("{base}{sep}{path}");

    let timeout_ms = tool
        .timeout_ms
        .map(|t| t.min(default_timeout_ms))
        .unwrap_or(default_timeout_ms);

    let mut req = OutgoingRequest::new(&method, String::new()).with_header("accept", "application/json");
    req.timeout_ms = timeout_ms;

    match method.as_str() {
        "GET" | "DELETE" | "HEAD" => {
            if !remaining.is_empty() {
                let query: Vec<String> = remaining
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| {
                        format!("{}={}", urlencoding::encode(k), urlencoding::encode(&scalar(v)))
                    })
                    .collect();
                if !query.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&query.join("&"));
                }
            }
        }
        _ => {
            req = req
                .with_header("content-type", "application/json")
                .with_body(serde_json::to_string(&Value::Object(remaining))?);
        }
    }

    req.url = url;
    Ok(req)
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn fill_path(template: &str, params: &mut Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            return Err(AdapterError::Request(format!("unterminated placeholder in '{template}'")));
        };
        let name = &rest[start + 1..start + len];
        let value = params
            .remove(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| AdapterError::Request(format!("path parameter '{name}' is missing")))?;
        out.push_str(&rest[..start]);
        out.push_str(&urlencoding::encode(&scalar(&value)));
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
