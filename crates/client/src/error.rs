//! Boundary error type.

use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the orchestration service.
///
/// Callers always recover these at the call site; they never propagate past
/// the HTTP or CLI edge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    /// Connection refused, timeout, TLS failure.
    #[error("orchestration transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("orchestration service rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The service answered 2xx with a payload we could not decode.
    #[error("invalid orchestration response: {0}")]
    InvalidResponse(String),

    #[error("task {0} not found")]
    NotFound(Uuid),

    /// No workflow is registered under this namespace and name.
    #[error("unknown workflow {namespace}/{name}")]
    UnknownWorkflow { namespace: String, name: String },
}

impl From<reqwest::Error> for BoundaryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BoundaryError::InvalidResponse(err.to_string())
        } else {
            BoundaryError::Transport(err.to_string())
        }
    }
}
