//! Caller identity: the rate-limit bucket for a request.
//!
//! Taken from `X-Caller-Id`; absent, blank or oversized values fall back
//! to `anonymous`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::fmt;

pub const CALLER_HEADER: &str = "x-caller-id";
const MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn anonymous() -> Self {
        Self("anonymous".into())
    }

    pub fn from_header(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if !v.is_empty() && v.len() <= MAX_LEN && !v.chars().any(char::is_control) => {
                Self(v.to_string())
            }
            _ => Self::anonymous(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts.headers.get(CALLER_HEADER).and_then(|v| v.to_str().ok());
        Ok(CallerId::from_header(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_header_value() {
        assert_eq!(CallerId::from_header(Some(" u1 ")).as_str(), "u1");
    }

    #[test]
    fn falls_back_to_anonymous() {
        assert_eq!(CallerId::from_header(None), CallerId::anonymous());
        assert_eq!(CallerId::from_header(Some("   ")), CallerId::anonymous());
        assert_eq!(CallerId::from_header(Some(&"x".repeat(200))), CallerId::anonymous());
    }
}
