//! Configured secrets, one entry per adapter.
//!
//! File shape (tagged by `type`):
//!
//! ```json
//! {
//!   "stripe-api":   {"type": "bearer", "token": "sk_live_..."},
//!   "paystack-api": {"type": "api_key", "header": "Authorization", "key": "..."},
//!   "insights":     {"type": "oauth2", "token_url": "https://...", "client_id": "...", "client_secret": "..."}
//! }
//! ```

use crate::error::{AuthError, Result};
use relay_adapter::AuthType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    Bearer {
        token: String,
    },
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Hmac {
        secret: String,
        #[serde(default = "default_signature_header")]
        signature_header: String,
        #[serde(default = "default_timestamp_header")]
        timestamp_header: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Credentials),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Credentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_api_key_header() -> String {
    "X-Api-Key".into()
}
fn default_signature_header() -> String {
    "X-Signature".into()
}
fn default_timestamp_header() -> String {
    "X-Timestamp".into()
}

impl Credentials {
    pub fn auth_type(&self) -> AuthType {
        match self {
            Credentials::Bearer { .. } => AuthType::Bearer,
            Credentials::ApiKey { .. } => AuthType::ApiKey,
            Credentials::Basic { .. } => AuthType::Basic,
            Credentials::Hmac { .. } => AuthType::Hmac,
            Credentials::OAuth2(_) => AuthType::OAuth2,
        }
    }
}

// Secrets never reach logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ApiKey { header, .. } => {
                f.debug_struct("ApiKey").field("header", header).finish_non_exhaustive()
            }
            Credentials::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
            Credentials::OAuth2(c) => f
                .debug_struct("OAuth2")
                .field("token_url", &c.token_url)
                .field("client_id", &c.client_id)
                .finish_non_exhaustive(),
            other => write!(f, "{}(..)", other.auth_type()),
        }
    }
}

impl std::fmt::Debug for OAuth2Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Credentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Parse a credentials document (adapter name → credentials).
pub fn parse_credentials(raw: &str) -> Result<HashMap<String, Credentials>> {
    serde_json::from_str(raw).map_err(|e| AuthError::Invalid(e.to_string()))
}
