//! Relay runtime: the adapter registry and the execution pipeline.
//!
//! # Architecture
//!
//! ```text
//! ExecutionRequest { adapter, tool, parameters, callerId, metadata }
//!   │
//!   ▼  ExecutionPipeline::dispatch
//! AdapterRegistry ─ lookup (immutable snapshot)
//! CircuitBreaker  ─ per adapter
//! RateLimiter     ─ per (caller, adapter), fixed window
//! CredentialStore ─ AuthStrategy::inject
//! Upstream        ─ timeout + retry with backoff
//!   │
//!   ▼
//! ExecutionResult ──► AuditLog (one record per dispatch)
//! ```

pub mod audit;
pub mod circuit;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod upstream;

pub use audit::{generate_report, AuditLog, AuditRecord, AuditReport};
pub use circuit::{CircuitBreaker, CircuitPermit, CircuitSnapshot, CircuitState};
pub use error::{ExecutionError, ExecutionResult, RegistryError};
pub use pipeline::{ExecutionPipeline, ExecutionRequest};
pub use rate_limit::{Decision, RateLimiter};
pub use registry::AdapterRegistry;
pub use retry::RetryPolicy;
pub use upstream::{HttpUpstream, Upstream};
