//! Unified API error type: every 4xx/5xx response is JSON with one shape.
//!
//! ```json
//! { "error": { "code": "adapter_not_found", "message": "...", "details": {} },
//!   "timestamp": "2024-01-01T00:00:00Z" }
//! ```

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use relay_runtime::ExecutionError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Value,
    /// Extra headers to include (e.g. Retry-After).
    pub extra_headers: Vec<(&'static str, String)>,
    /// When the failure happened; response time if unset.
    pub timestamp: Option<DateTime<Utc>>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Value::Object(Default::default()),
            extra_headers: vec![],
            timestamp: None,
        }
    }

    /// Stamp the envelope with the dispatch's own time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", format!("{resource} not found"))
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "content-type must be application/json",
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }
}

impl From<ExecutionError> for AppError {
    fn from(err: ExecutionError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut extra_headers = vec![];
        if let ExecutionError::RateLimitExceeded { reset_at, .. } = &err {
            let now = Utc::now();
            let wait_ms = (*reset_at - now).num_milliseconds().max(0);
            let retry_after = ((wait_ms + 999) / 1000).max(1);
            extra_headers.push(("x-ratelimit-reset", reset_at.timestamp().to_string()));
            extra_headers.push(("retry-after", retry_after.to_string()));
        }
        if let ExecutionError::CircuitOpen { retry_after_ms, .. } = &err {
            extra_headers.push(("retry-after", retry_after_ms.div_ceil(1000).max(1).to_string()));
        }
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            details: err.details(),
            extra_headers,
            timestamp: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiErrorEnvelope {
            error: ApiErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
            timestamp: self.timestamp.unwrap_or_else(Utc::now).to_rfc3339(),
        };
        let mut resp = (self.status, Json(body)).into_response();
        for (k, v) in &self.extra_headers {
            if let Ok(val) = HeaderValue::from_str(v) {
                resp.headers_mut().insert(HeaderName::from_static(*k), val);
            }
        }
        resp
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.status.as_u16(), self.code, self.message)
    }
}

impl std::error::Error for AppError {}
