//! Credential injection, one variant per scheme.
//!
//! `inject` never mutates its input in place; it consumes the request and
//! returns a copy carrying the credentials.

use crate::credentials::Credentials;
use crate::error::Result;
use crate::oauth2::{HttpTokenSource, OAuth2Session, RefreshPolicy};
use crate::signing::HmacSigner;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use relay_adapter::{AuthType, OutgoingRequest};
use std::sync::Arc;

pub enum AuthStrategy {
    Bearer { token: String },
    ApiKey { header: String, key: String },
    Basic { username: String, password: String },
    Hmac(HmacSigner),
    OAuth2(Arc<OAuth2Session>),
}

impl AuthStrategy {
    /// Build the strategy for an adapter's configured credentials.
    pub fn from_credentials(adapter: &str, creds: &Credentials, policy: RefreshPolicy) -> Self {
        match creds {
            Credentials::Bearer { token } => AuthStrategy::Bearer { token: token.clone() },
            Credentials::ApiKey { key, header } => AuthStrategy::ApiKey {
                header: header.clone(),
                key: key.clone(),
            },
            Credentials::Basic { username, password } => AuthStrategy::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            Credentials::Hmac {
                secret,
                signature_header,
                timestamp_header,
            } => AuthStrategy::Hmac(HmacSigner::new(secret, signature_header, timestamp_header)),
            Credentials::OAuth2(c) => AuthStrategy::OAuth2(OAuth2Session::new(
                adapter,
                Arc::new(HttpTokenSource::new(c.clone())),
                policy,
            )),
        }
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            AuthStrategy::Bearer { .. } => AuthType::Bearer,
            AuthStrategy::ApiKey { .. } => AuthType::ApiKey,
            AuthStrategy::Basic { .. } => AuthType::Basic,
            AuthStrategy::Hmac(_) => AuthType::Hmac,
            AuthStrategy::OAuth2(_) => AuthType::OAuth2,
        }
    }

    /// Attach credentials. Only OAuth2 can suspend (token refresh).
    pub async fn inject(&self, mut req: OutgoingRequest) -> Result<OutgoingRequest> {
        match self {
            AuthStrategy::Bearer { token } => {
                req.headers.insert("Authorization".into(), format!("Bearer {token}"));
            }
            AuthStrategy::ApiKey { header, key } => {
                req.headers.insert(header.clone(), key.clone());
            }
            AuthStrategy::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{password}"));
                req.headers.insert("Authorization".into(), format!("Basic {encoded}"));
            }
            AuthStrategy::Hmac(signer) => {
                req = signer.sign(req, chrono::Utc::now().timestamp());
            }
            AuthStrategy::OAuth2(session) => {
                let token = session.access_token().await?;
                req.headers.insert("Authorization".into(), format!("Bearer {token}"));
            }
        }
        Ok(req)
    }
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::ApiKey { header, .. } => {
                f.debug_struct("ApiKey").field("header", header).finish_non_exhaustive()
            }
            AuthStrategy::Hmac(signer) => f.debug_tuple("Hmac").field(signer).finish(),
            AuthStrategy::OAuth2(session) => f
                .debug_struct("OAuth2")
                .field("adapter", &session.adapter())
                .finish_non_exhaustive(),
            other => write!(f, "{}(..)", other.auth_type()),
        }
    }
}
