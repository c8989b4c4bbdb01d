//! `client` crate: the orchestration boundary.
//!
//! Everything that talks to a workflow orchestration service goes through
//! [`OrchestrationClient`]. [`HttpOrchestrationClient`] speaks to a remote
//! service; the engine crate provides an in-process implementation.

pub mod error;
pub mod http;
pub mod models;

use async_trait::async_trait;
use uuid::Uuid;

pub use error::BoundaryError;
pub use http::{ClientConfig, HttpOrchestrationClient};
pub use models::{
    idempotency_key, CorrelationEnvelope, CreatedTask, StepSnapshot, StepState, TaskRequest,
    TaskSnapshot, TaskStatus,
};

/// The two calls the rest of the system may make against an orchestration
/// service. Implementations must be safe to share across concurrent callers.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    /// Submit a task. Re-submitting a request with the same idempotency key
    /// returns the task created the first time.
    async fn create_task(&self, request: TaskRequest) -> Result<CreatedTask, BoundaryError>;

    /// Current state of one task.
    async fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError>;
}
