use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("invalid descriptor '{adapter}': {reason}")]
    InvalidDescriptor { adapter: String, reason: String },

    #[error("request: {0}")]
    Request(String),

    #[error("http: {0}")]
    Http(String),

    #[error("timeout: adapter '{adapter}' exceeded {timeout_ms}ms")]
    Timeout { adapter: String, timeout_ms: u64 },

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AdapterError {
    pub fn invalid(adapter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            adapter: adapter.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
