//! Relay adapters: the data model for provider integrations and the
//! upstream IO boundary.
//!
//! An adapter is an immutable descriptor (name, version, base URL, auth
//! scheme, tools). Descriptors are produced by the offline generator and
//! loaded at startup; nothing here mutates them after construction.
//!
//! # Architecture
//!
//! ```text
//! AdapterDescriptor { name, baseUrl, authType, tools[] }
//!   │
//!   ▼  validate_parameters(tool.inputSchema, params)
//! OutgoingRequest { method, url, headers, body }
//!   │
//!   ▼  (IO boundary, feature "http")
//! http::execute()
//!   │
//!   ▼
//! UpstreamResponse { status, headers, body }
//! ```

pub mod descriptor;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod request;
pub mod schema;

pub use descriptor::{AdapterDescriptor, AuthType, InputSchema, ParamSpec, ParamType, ToolDescriptor};
pub use error::AdapterError;
pub use request::{build_request, OutgoingRequest, UpstreamResponse};
pub use schema::{validate_parameters, FieldError};
