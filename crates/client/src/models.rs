//! Wire types of the orchestration boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex characters kept from the SHA-256 digest.
const IDEMPOTENCY_KEY_LEN: usize = 32;

/// Deterministic idempotency key for one domain record in one namespace.
///
/// `sha256("<record_kind>:<record_id>|<namespace>")`, hex, first 32 chars.
pub fn idempotency_key(record_kind: &str, record_id: &str, namespace: &str) -> String {
    let digest = Sha256::digest(format!("{record_kind}:{record_id}|{namespace}").as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(IDEMPOTENCY_KEY_LEN);
    key
}

// ---------------------------------------------------------------------------
// Task creation
// ---------------------------------------------------------------------------

/// Correlation metadata attached to every task-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEnvelope {
    /// Shared by every task that belongs to one business event.
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_correlation_id: Option<Uuid>,
    pub idempotency_key: String,
}

impl CorrelationEnvelope {
    /// Envelope for a domain record submitted to `namespace`.
    pub fn for_record(
        correlation_id: Uuid,
        record_kind: &str,
        record_id: &str,
        namespace: &str,
    ) -> Self {
        Self {
            correlation_id,
            parent_correlation_id: None,
            idempotency_key: idempotency_key(record_kind, record_id, namespace),
        }
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_correlation_id = Some(parent);
        self
    }
}

/// Body of `POST /v1/tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub context: Value,
    pub initiator: String,
    pub source_system: String,
    pub reason: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub envelope: CorrelationEnvelope,
}

impl TaskRequest {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        context: Value,
        envelope: CorrelationEnvelope,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: "1.0.0".into(),
            context,
            initiator: "flowbridge".into(),
            source_system: "flowbridge-api".into(),
            reason: String::new(),
            tags: Vec::new(),
            envelope,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub task_uuid: Uuid,
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    InProgress,
    /// Failed with a retryable error; another attempt is scheduled.
    WaitingForRetry,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub name: String,
    pub current_state: StepState,
    pub attempts: u32,
    /// Result of a completed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Last error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `GET /v1/tasks/{uuid}`.
///
/// The service is only required to send `status`, `total_steps` and `steps`.
/// Identity fields default to empty; the HTTP client fills `task_uuid` from
/// the request path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(default)]
    pub task_uuid: Uuid,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    pub status: TaskStatus,
    pub total_steps: usize,
    pub steps: Vec<StepSnapshot>,
}

impl TaskSnapshot {
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.current_state == StepState::Complete)
            .count()
    }

    pub fn step(&self, name: &str) -> Option<&StepSnapshot> {
        self.steps.iter().find(|s| s.name == name)
    }
}
