//! Error types for the Agent Door domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; messages are written to be
//! safe to return to clients (no internal paths, no upstream bodies).

use thiserror::Error;

/// Rejection reasons from the URL safety gate.
///
/// The display strings double as client-facing error messages, so they name
/// the policy that fired without leaking what was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("URL is not valid")]
    Invalid,

    #[error("URL scheme must be http or https")]
    Scheme,

    #[error("URL points to a private or internal address (not allowed)")]
    Private,

    #[error("URL hostname could not be resolved")]
    Unresolvable,
}

/// Failures turning an OpenAPI document into a capability table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("OpenAPI spec has no paths object")]
    MissingPaths,

    #[error("OpenAPI spec paths must be an object")]
    PathsNotObject,

    #[error("OpenAPI spec has no operations")]
    NoOperations,

    #[error("OpenAPI spec has too many paths ({count}, max {max})")]
    TooManyPaths { count: usize, max: usize },
}

/// Failures from the durable registration store.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry storage error: {0}")]
    Storage(String),

    #[error("Registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures calling the registered upstream API.
///
/// Only the status code of a non-2xx upstream answer is ever surfaced; the
/// response body stays in the logs.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream returned {0}")]
    Status(u16),

    #[error("Upstream request failed")]
    Network(String),

    #[error("Upstream returned invalid JSON")]
    InvalidJson,
}
