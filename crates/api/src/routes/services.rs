//! Service requests, driven by the diamond-shaped user registration workflow.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use db::{DomainRecord, RecordKind};
use engine::{definitions, DelegationTarget};
use handlers::{microservices::RegistrationInput, TaskInputs};

use super::records::{self, ApiResponse, RecordView};
use crate::{error::reject_invalid_input, ApiError, AppState};

/// `POST /services/requests`: `email` and `full_name` are required; `plan`,
/// `source`, `phone` and `preferences` are optional.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<DomainRecord>>), ApiError> {
    if let Err(err) = TaskInputs::new(body.clone()).parse::<RegistrationInput>() {
        reject_invalid_input(err)?;
    }

    let target = DelegationTarget::new(
        definitions::MICROSERVICES,
        definitions::USER_REGISTRATION,
        body.clone(),
    );
    records::create_and_submit(&state, RecordKind::ServiceRequest, body, vec![target]).await
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecordView>>, ApiError> {
    records::fetch_with_tasks(&state, RecordKind::ServiceRequest, id).await
}
