//! Analytics jobs, driven by the parallel extract/transform pipeline.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use db::{DomainRecord, RecordKind};
use engine::{definitions, DelegationTarget};
use handlers::{data_pipeline::PipelineInput, TaskInputs};

use super::records::{self, ApiResponse, RecordView};
use crate::{error::reject_invalid_input, ApiError, AppState};

/// `POST /analytics/jobs`: every field is optional, so an empty body
/// starts a job with the pipeline defaults.
pub async fn create(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Result<(StatusCode, Json<ApiResponse<DomainRecord>>), ApiError> {
    let body = body
        .map(|Json(v)| v)
        .unwrap_or_else(|| Value::Object(Map::new()));

    if let Err(err) = TaskInputs::new(body.clone()).parse::<PipelineInput>() {
        reject_invalid_input(err)?;
    }

    let target = DelegationTarget::new(
        definitions::DATA_PIPELINE,
        definitions::ANALYTICS_PIPELINE,
        body.clone(),
    );
    records::create_and_submit(&state, RecordKind::AnalyticsJob, body, vec![target]).await
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecordView>>, ApiError> {
    records::fetch_with_tasks(&state, RecordKind::AnalyticsJob, id).await
}
