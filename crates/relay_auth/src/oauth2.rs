//! OAuth2 access tokens with single-flight refresh.
//!
//! Each adapter owns one [`OAuth2Session`]. A cached token is reused until
//! it comes within `skew` of expiry. When a refresh is needed, the first
//! caller installs a shared refresh future in the session's slot; every
//! concurrent caller awaits that same future and receives the same token
//! or the same error. The refresh runs under `RefreshPolicy::timeout`, and
//! the slot is cleared when it settles, so a stuck token endpoint cannot
//! block the adapter beyond one deadline.

use crate::credentials::OAuth2Credentials;
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AccessToken {
    pub fn expiring_in(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn usable(&self, skew: Duration) -> bool {
        Instant::now() + skew < self.expires_at
    }
}

/// Failure reported by a token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError {
    pub message: String,
    /// Transient failures are retried within the refresh deadline.
    pub transient: bool,
}

impl TokenError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> std::result::Result<AccessToken, TokenError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Deadline for the whole refresh, retries included.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Tokens closer than this to expiry are refreshed.
    pub skew: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            skew: Duration::from_secs(30),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken>>>;

#[derive(Default)]
struct SessionState {
    token: Option<AccessToken>,
    inflight: Option<RefreshFuture>,
}

pub struct OAuth2Session {
    adapter: String,
    source: Arc<dyn TokenSource>,
    policy: RefreshPolicy,
    state: Mutex<SessionState>,
}

impl OAuth2Session {
    pub fn new(adapter: impl Into<String>, source: Arc<dyn TokenSource>, policy: RefreshPolicy) -> Arc<Self> {
        Arc::new(Self {
            adapter: adapter.into(),
            source,
            policy,
            state: Mutex::new(SessionState::default()),
        })
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// A usable access token, refreshing (single-flight) when needed.
    pub async fn access_token(self: &Arc<Self>) -> Result<String> {
        let pending = {
            let mut st = self.state.lock();
            if let Some(tok) = st.token.as_ref().filter(|t| t.usable(self.policy.skew)) {
                return Ok(tok.value.clone());
            }
            match &st.inflight {
                Some(fut) => fut.clone(),
                None => {
                    let fut = Arc::clone(self).refresh().boxed().shared();
                    st.inflight = Some(fut.clone());
                    fut
                }
            }
        };
        pending.await.map(|t| t.value)
    }

    /// Drop the cached token so the next caller refreshes.
    pub fn invalidate(&self) {
        self.state.lock().token = None;
    }

    async fn refresh(self: Arc<Self>) -> Result<AccessToken> {
        debug!(adapter = %self.adapter, "refreshing oauth2 token");
        let outcome = match tokio::time::timeout(self.policy.timeout, self.fetch_with_retry()).await {
            Ok(res) => res,
            Err(_) => Err(AuthError::RefreshTimeout {
                adapter: self.adapter.clone(),
                timeout_ms: self.policy.timeout.as_millis() as u64,
            }),
        };

        let label = if outcome.is_ok() { "ok" } else { "error" };
        metrics::counter!("relay_oauth_refresh_total", "adapter" => self.adapter.clone(), "outcome" => label)
            .increment(1);

        let mut st = self.state.lock();
        st.inflight = None;
        match &outcome {
            Ok(tok) => st.token = Some(tok.clone()),
            Err(e) => {
                st.token = None;
                warn!(adapter = %self.adapter, error = %e, "oauth2 refresh failed");
            }
        }
        outcome
    }

    async fn fetch_with_retry(&self) -> Result<AccessToken> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.source.fetch().await {
                Ok(tok) => return Ok(tok),
                Err(e) if e.transient && attempt < max => {
                    let delay = self.policy.backoff * 2u32.saturating_pow(attempt - 1);
                    debug!(adapter = %self.adapter, attempt, error = %e, ?delay, "token endpoint transient failure");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AuthError::Refresh {
                        adapter: self.adapter.clone(),
                        cause: format!("{e} (after {attempt} attempt(s))"),
                    })
                }
            }
        }
    }
}

// ── Client-credentials token endpoint ───────────────────────────────

pub struct HttpTokenSource {
    client: reqwest::Client,
    creds: OAuth2Credentials,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl HttpTokenSource {
    pub fn new(creds: OAuth2Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            creds,
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> std::result::Result<AccessToken, TokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.creds.client_id.as_str()),
            ("client_secret", self.creds.client_secret.as_str()),
        ];
        if let Some(scope) = &self.creds.scope {
            form.push(("scope", scope.as_str()));
        }

        let resp = self
            .client
            .post(&self.creds.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::transient(format!("token endpoint unreachable: {e}")))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(TokenError::transient(format!("token endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(TokenError::fatal(format!("token endpoint rejected credentials: {status}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TokenError::fatal(format!("malformed token response: {e}")))?;
        Ok(AccessToken::expiring_in(
            body.access_token,
            Duration::from_secs(body.expires_in.unwrap_or(3600)),
        ))
    }
}
