//! Relay auth: turns configured credentials into request mutations.
//!
//! - [`Credentials`]: what the operator configured per adapter
//! - [`AuthStrategy`]: Bearer, API key, Basic, HMAC, OAuth2
//! - [`OAuth2Session`]: cached token with single-flight refresh
//! - [`CredentialStore`]: adapter name → strategy, with a scheme check

pub mod credentials;
pub mod error;
pub mod oauth2;
pub mod signing;
pub mod store;
pub mod strategy;

pub use credentials::{parse_credentials, Credentials, OAuth2Credentials};
pub use error::AuthError;
pub use oauth2::{AccessToken, HttpTokenSource, OAuth2Session, RefreshPolicy, TokenError, TokenSource};
pub use signing::HmacSigner;
pub use store::CredentialStore;
pub use strategy::AuthStrategy;
