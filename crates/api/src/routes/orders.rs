//! E-commerce orders, driven by the linear order-processing workflow.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use db::{DomainRecord, RecordKind};
use engine::{definitions, DelegationTarget};
use handlers::{ecommerce::OrderInput, TaskInputs};

use super::records::{self, ApiResponse, RecordView};
use crate::{error::reject_invalid_input, ApiError, AppState};

/// `POST /orders`: the body is the task context (`customer_email`,
/// `cart_items`, optional `payment_token` and `shipping_address`).
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<DomainRecord>>), ApiError> {
    if let Err(err) = TaskInputs::new(body.clone()).parse::<OrderInput>() {
        reject_invalid_input(err)?;
    }

    let target = DelegationTarget::new(definitions::ECOMMERCE, definitions::ORDER_PROCESSING, body.clone());
    records::create_and_submit(&state, RecordKind::Order, body, vec![target]).await
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecordView>>, ApiError> {
    records::fetch_with_tasks(&state, RecordKind::Order, id).await
}
