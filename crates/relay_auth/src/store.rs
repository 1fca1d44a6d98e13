//! Per-adapter credential store.
//!
//! Lookup is by adapter name only. The strategy registered for an adapter
//! must match the scheme its descriptor declares; a mismatch is reported
//! rather than silently sending the wrong credentials.

use crate::credentials::{parse_credentials, Credentials};
use crate::error::{AuthError, Result};
use crate::oauth2::RefreshPolicy;
use crate::strategy::AuthStrategy;
use relay_adapter::{AdapterDescriptor, OutgoingRequest};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CredentialStore {
    strategies: HashMap<String, Arc<AuthStrategy>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_credentials(creds: &HashMap<String, Credentials>, policy: RefreshPolicy) -> Self {
        let strategies = creds
            .iter()
            .map(|(adapter, c)| {
                (
                    adapter.clone(),
                    Arc::new(AuthStrategy::from_credentials(adapter, c, policy)),
                )
            })
            .collect();
        Self { strategies }
    }

    /// Load a credentials file (see [`crate::credentials`] for the shape).
    pub fn load(path: &Path, policy: RefreshPolicy) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Invalid(format!("read {}: {e}", path.display())))?;
        Ok(Self::from_credentials(&parse_credentials(&raw)?, policy))
    }

    pub fn set(&mut self, adapter: &str, strategy: AuthStrategy) {
        self.strategies.insert(adapter.to_string(), Arc::new(strategy));
    }

    pub fn resolve(&self, adapter: &str) -> Option<Arc<AuthStrategy>> {
        self.strategies.get(adapter).cloned()
    }

    /// Forget a cached OAuth2 token (the provider rejected it).
    pub fn invalidate(&self, adapter: &str) {
        if let Some(strategy) = self.strategies.get(adapter) {
            if let AuthStrategy::OAuth2(session) = strategy.as_ref() {
                session.invalidate();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Inject the adapter's credentials into `req`.
    pub async fn inject(&self, adapter: &AdapterDescriptor, req: OutgoingRequest) -> Result<OutgoingRequest> {
        let strategy = self
            .resolve(&adapter.name)
            .ok_or_else(|| AuthError::MissingCredentials {
                adapter: adapter.name.clone(),
            })?;
        if strategy.auth_type() != adapter.auth_type {
            return Err(AuthError::SchemeMismatch {
                adapter: adapter.name.clone(),
                declared: adapter.auth_type,
                configured: strategy.auth_type(),
            });
        }
        strategy.inject(req).await
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CredentialStore").field("adapters", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_adapter::AuthType;

    fn stripe() -> AdapterDescriptor {
        AdapterDescriptor::new("stripe-api", "https://api.stripe.com", AuthType::Bearer)
    }

    fn req() -> OutgoingRequest {
        OutgoingRequest::new("POST", "https://api.stripe.com/v1/charges")
    }

    #[tokio::test]
    async fn injects_for_known_adapter() {
        let mut store = CredentialStore::new();
        store.set("stripe-api", AuthStrategy::Bearer { token: "sk".into() });
        let out = store.inject(&stripe(), req()).await.unwrap();
        assert_eq!(out.headers["Authorization"], "Bearer sk");
    }

    #[tokio::test]
    async fn missing_credentials() {
        let store = CredentialStore::new();
        let err = store.inject(&stripe(), req()).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingCredentials {
                adapter: "stripe-api".into()
            }
        );
    }

    #[tokio::test]
    async fn scheme_mismatch_is_rejected() {
        let mut store = CredentialStore::new();
        store.set(
            "stripe-api",
            AuthStrategy::ApiKey {
                header: "X-Api-Key".into(),
                key: "k".into(),
            },
        );
        let err = store.inject(&stripe(), req()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::SchemeMismatch {
                declared: AuthType::Bearer,
                configured: AuthType::ApiKey,
                ..
            }
        ));
    }

    #[test]
    fn builds_from_parsed_file() {
        let creds = parse_credentials(
            r#"{"stripe-api": {"type": "bearer", "token": "sk"},
                "acme-bank": {"type": "basic", "username": "u", "password": "p"}}"#,
        )
        .unwrap();
        let store = CredentialStore::from_credentials(&creds, RefreshPolicy::default());
        assert_eq!(store.len(), 2);
        assert_eq!(store.resolve("acme-bank").unwrap().auth_type(), AuthType::Basic);
        assert!(store.resolve("other").is_none());
        let dbg = format!("{store:?}");
        assert!(dbg.contains("acme-bank") && !dbg.contains("\"p\""));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CredentialStore::load(Path::new("/nonexistent/creds.json"), RefreshPolicy::default()).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }
}
