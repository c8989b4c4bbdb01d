//! HTTP-facing error type.
//!
//! Orchestration failures never reach this type: they are folded into the
//! record's status or the merged task view by the route handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use handlers::{error::codes, StepError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body does not satisfy the workflow's context schema.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("record not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(db::DbError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<db::DbError> for ApiError {
    fn from(err: db::DbError) -> Self {
        match err {
            db::DbError::NotFound => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

/// Only malformed input is rejected at the edge. Business rules such as
/// refund limits are left to the workflow, where they fail the task.
pub(crate) fn reject_invalid_input(err: StepError) -> Result<(), ApiError> {
    match err.code() {
        Some(codes::INVALID_INPUT) => Err(ApiError::Validation(err.message().to_string())),
        _ => Ok(()),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Store(ref err) = self {
            error!("Store failure: {}", err);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
