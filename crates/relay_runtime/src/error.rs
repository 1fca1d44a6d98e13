use chrono::{DateTime, Utc};
use relay_adapter::FieldError;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid descriptor: {0}")]
    Invalid(#[from] relay_adapter::AdapterError),
    #[error("load {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Caller-visible failure of one dispatch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("adapter '{adapter}' not found")]
    AdapterNotFound { adapter: String },

    #[error("tool '{tool}' not found on adapter '{adapter}'")]
    ToolNotFound { adapter: String, tool: String },

    #[error("invalid parameters: {}", join_fields(.fields))]
    Validation { fields: Vec<FieldError> },

    #[error("circuit open for adapter '{adapter}'")]
    CircuitOpen { adapter: String, retry_after_ms: u64 },

    #[error("rate limit of {limit} exceeded for caller '{caller}' on adapter '{adapter}'")]
    RateLimitExceeded {
        adapter: String,
        caller: String,
        limit: u64,
        reset_at: DateTime<Utc>,
    },

    #[error("authentication failed for adapter '{adapter}': {reason}")]
    AuthenticationFailed { adapter: String, reason: String },

    #[error("upstream error from '{adapter}': {message}")]
    Upstream {
        adapter: String,
        status: Option<u16>,
        message: String,
        body: Value,
        attempts: u32,
    },

    #[error("upstream '{adapter}' timed out after {timeout_ms}ms")]
    Timeout {
        adapter: String,
        timeout_ms: u64,
        attempts: u32,
    },
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ExecutionError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::AdapterNotFound { .. } => "adapter_not_found",
            ExecutionError::ToolNotFound { .. } => "tool_not_found",
            ExecutionError::Validation { .. } => "validation_error",
            ExecutionError::CircuitOpen { .. } => "circuit_open",
            ExecutionError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ExecutionError::AuthenticationFailed { .. } => "authentication_failed",
            ExecutionError::Upstream { .. } => "upstream_error",
            ExecutionError::Timeout { .. } => "timeout",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ExecutionError::AdapterNotFound { .. } | ExecutionError::ToolNotFound { .. } => 404,
            ExecutionError::Validation { .. } => 422,
            ExecutionError::RateLimitExceeded { .. } => 429,
            ExecutionError::AuthenticationFailed { .. } => 401,
            ExecutionError::CircuitOpen { .. }
            | ExecutionError::Upstream { .. }
            | ExecutionError::Timeout { .. } => 503,
        }
    }

    pub fn details(&self) -> Value {
        match self {
            ExecutionError::AdapterNotFound { adapter } => json!({ "adapter": adapter }),
            ExecutionError::ToolNotFound { adapter, tool } => json!({ "adapter": adapter, "tool": tool }),
            ExecutionError::Validation { fields } => json!({ "fields": fields }),
            ExecutionError::CircuitOpen { adapter, retry_after_ms } => {
                json!({ "adapter": adapter, "retryAfterMs": retry_after_ms })
            }
            ExecutionError::RateLimitExceeded {
                adapter,
                caller,
                limit,
                reset_at,
            } => json!({
                "adapter": adapter,
                "caller": caller,
                "limit": limit,
                "resetAt": reset_at.to_rfc3339(),
            }),
            ExecutionError::AuthenticationFailed { adapter, reason } => {
                json!({ "adapter": adapter, "reason": reason })
            }
            ExecutionError::Upstream {
                adapter,
                status,
                body,
                attempts,
                ..
            } => json!({
                "adapter": adapter,
                "upstreamStatus": status,
                "upstreamBody": body,
                "attempts": attempts,
            }),
            ExecutionError::Timeout {
                adapter,
                timeout_ms,
                attempts,
            } => json!({ "adapter": adapter, "timeoutMs": timeout_ms, "attempts": attempts }),
        }
    }

    /// `{code, message, details}`, the normalized caller-facing shape.
    pub fn to_json(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": self.details(),
        })
    }
}

/// Outcome of one dispatch. Always timestamped.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success {
        data: Value,
        status: u16,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Failure {
        error: ExecutionError,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            ExecutionResult::Failure { error, .. } => Some(error),
            ExecutionResult::Success { .. } => None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ExecutionResult::Success { status, .. } => *status,
            ExecutionResult::Failure { error, .. } => error.status_code(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecutionResult::Success { .. } => "ok",
            ExecutionResult::Failure { error, .. } => error.code(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            ExecutionResult::Success { duration_ms, .. } | ExecutionResult::Failure { duration_ms, .. } => {
                *duration_ms
            }
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ExecutionResult::Success { timestamp, .. } | ExecutionResult::Failure { timestamp, .. } => *timestamp,
        }
    }

    /// JSON form recorded in the audit trail.
    pub fn snapshot(&self) -> Value {
        match self {
            ExecutionResult::Success { data, status, .. } => json!({
                "outcome": "success",
                "status": status,
                "data": data,
            }),
            ExecutionResult::Failure { error, .. } => json!({
                "outcome": "failure",
                "error": error.to_json(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_follow_taxonomy() {
        let cases: Vec<(ExecutionError, &str, u16)> = vec![
            (ExecutionError::AdapterNotFound { adapter: "x".into() }, "adapter_not_found", 404),
            (
                ExecutionError::ToolNotFound {
                    adapter: "x".into(),
                    tool: "y".into(),
                },
                "tool_not_found",
                404,
            ),
            (ExecutionError::Validation { fields: vec![] }, "validation_error", 422),
            (
                ExecutionError::CircuitOpen {
                    adapter: "x".into(),
                    retry_after_ms: 10,
                },
                "circuit_open",
                503,
            ),
            (
                ExecutionError::AuthenticationFailed {
                    adapter: "x".into(),
                    reason: "r".into(),
                },
                "authentication_failed",
                401,
            ),
            (
                ExecutionError::Timeout {
                    adapter: "x".into(),
                    timeout_ms: 5,
                    attempts: 3,
                },
                "timeout",
                503,
            ),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status_code(), status);
            assert_eq!(err.to_json()["code"], code);
        }
    }

    #[test]
    fn validation_names_every_field() {
        let err = ExecutionError::Validation {
            fields: vec![
                FieldError {
                    field: "reference".into(),
                    message: "required parameter is missing".into(),
                },
                FieldError {
                    field: "amount".into(),
                    message: "expected integer, got string".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("reference") && msg.contains("amount"), "{msg}");
        assert_eq!(err.details()["fields"][0]["field"], "reference");
    }

    #[test]
    fn failure_snapshot_carries_error_shape() {
        let r = ExecutionResult::Failure {
            error: ExecutionError::AdapterNotFound { adapter: "nope".into() },
            duration_ms: 0,
            timestamp: Utc::now(),
        };
        assert!(!r.is_success());
        assert_eq!(r.status_code(), 404);
        assert_eq!(r.snapshot()["error"]["details"]["adapter"], "nope");
    }
}
