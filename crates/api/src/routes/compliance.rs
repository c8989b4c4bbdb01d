//! Refund compliance checks.
//!
//! One refund is split across two namespaces owned by different teams:
//! `customer_success/process_refund` handles the ticket and approval side,
//! `payments/process_refund` moves the money. The two tasks share a
//! correlation id and nothing else.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use db::{DomainRecord, RecordKind};
use engine::{definitions, DelegationTarget};
use handlers::{
    customer_success::RefundRequestInput, payments::PaymentRefundInput, Money, TaskInputs,
};

use super::records::{self, ApiResponse, RecordView};
use crate::{error::reject_invalid_input, ApiError, AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefundRequest {
    pub ticket_id: String,
    pub customer_id: String,
    pub payment_id: String,
    pub refund_amount: Money,
    pub customer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl CreateRefundRequest {
    fn customer_success_context(&self) -> Value {
        json!({
            "ticket_id": self.ticket_id,
            "customer_id": self.customer_id,
            "refund_amount": self.refund_amount,
            "customer_email": self.customer_email,
            "refund_reason": self.refund_reason,
            "payment_id": self.payment_id,
        })
    }

    fn payments_context(&self) -> Value {
        let mut context = json!({
            "payment_id": self.payment_id,
            "refund_amount": self.refund_amount,
            "customer_email": self.customer_email,
            "order_id": self.order_id,
            "refund_reason": self.refund_reason,
        });
        if let Some(method) = &self.payment_method {
            context["payment_method"] = json!(method);
        }
        context
    }
}

/// `POST /compliance/refunds`
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<DomainRecord>>), ApiError> {
    let request: CreateRefundRequest =
        serde_json::from_value(body).map_err(|e| ApiError::Validation(e.to_string()))?;
    let cs_context = request.customer_success_context();
    let payments_context = request.payments_context();

    if let Err(err) = TaskInputs::new(cs_context.clone()).parse::<RefundRequestInput>() {
        reject_invalid_input(err)?;
    }
    if let Err(err) = TaskInputs::new(payments_context.clone()).parse::<PaymentRefundInput>() {
        reject_invalid_input(err)?;
    }

    let payload = serde_json::to_value(&request)
        .map_err(|e| ApiError::Validation(format!("unserializable request: {e}")))?;

    // Customer success goes first: its task id is the record's primary task.
    let targets = vec![
        DelegationTarget::new(definitions::CUSTOMER_SUCCESS, definitions::PROCESS_REFUND, cs_context),
        DelegationTarget::new(definitions::PAYMENTS, definitions::PROCESS_REFUND, payments_context),
    ];
    records::create_and_submit(&state, RecordKind::ComplianceCheck, payload, targets).await
}

/// `GET /compliance/refunds/:id`: both namespaces' task state. A namespace
/// that cannot be queried shows up as `unknown` and the response stays `200`.
pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecordView>>, ApiError> {
    records::fetch_with_tasks(&state, RecordKind::ComplianceCheck, id).await
}
