use relay_adapter::AuthType;
use thiserror::Error;

/// Why credentials could not be attached.
///
/// `Clone` so a single failed refresh can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credentials configured for adapter '{adapter}'")]
    MissingCredentials { adapter: String },

    #[error("adapter '{adapter}' declares {declared} auth but {configured} credentials are configured")]
    SchemeMismatch {
        adapter: String,
        declared: AuthType,
        configured: AuthType,
    },

    #[error("token refresh for '{adapter}' failed: {cause}")]
    Refresh { adapter: String, cause: String },

    #[error("token refresh for '{adapter}' timed out after {timeout_ms}ms")]
    RefreshTimeout { adapter: String, timeout_ms: u64 },

    #[error("invalid credentials: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
