//! Lifecycle shared by every record kind: persist, submit, attach, query.

use std::collections::BTreeMap;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use db::{DomainRecord, RecordKind, RecordStatus, TaskAttachment};
use engine::{DelegationTarget, NamespaceStatus};

use crate::{ApiError, AppState};

/// Envelope for every successful response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
        }
    }
}

/// A record together with the live state of each of its tasks.
#[derive(Debug, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: DomainRecord,
    pub tasks: BTreeMap<String, NamespaceStatus>,
}

/// Persist a record, then submit one task per target.
///
/// The record is created before any submission and is returned with `201`
/// whatever the orchestration boundary does: `processing` if every task was
/// created, `pending` otherwise.
pub(crate) async fn create_and_submit(
    state: &AppState,
    kind: RecordKind,
    payload: Value,
    targets: Vec<DelegationTarget>,
) -> Result<(StatusCode, Json<ApiResponse<DomainRecord>>), ApiError> {
    let record = state.store.create(DomainRecord::new(kind, payload)).await?;
    info!("{} {} created", kind, record.id);

    let targets = targets
        .into_iter()
        .map(|t| t.with_version(&state.settings.workflow_version))
        .collect();
    let outcome = state
        .delegator
        .submit(kind.as_str(), &record.id.to_string(), targets)
        .await;

    let status = if outcome.fully_submitted() {
        RecordStatus::Processing
    } else {
        warn!(
            "{} {} left pending; failed namespaces: {:?}",
            kind,
            record.id,
            outcome.errors.keys().collect::<Vec<_>>()
        );
        RecordStatus::Pending
    };

    let attachment = TaskAttachment {
        status,
        task_uuid: outcome.primary_task(),
        task_uuids: outcome.task_uuids,
        correlation_id: Some(outcome.correlation_id),
    };
    let record = state.store.attach_tasks(record.id, attachment).await?;

    let message = match status {
        RecordStatus::Processing => format!("{} created", kind),
        _ => format!("{} created; task submission failed and can be retried", kind),
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::new(record, message))))
}

/// Load a record and merge the state of all its tasks.
pub(crate) async fn fetch_with_tasks(
    state: &AppState,
    kind: RecordKind,
    id: Uuid,
) -> Result<Json<ApiResponse<RecordView>>, ApiError> {
    let record = state.store.get(kind, id).await?;
    let tasks = state.delegator.merged_status(&record.task_uuids).await;

    Ok(Json(ApiResponse::new(
        RecordView { record, tasks },
        format!("{} retrieved", kind),
    )))
}
