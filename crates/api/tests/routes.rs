//! Route tests: the real router over an in-memory store and the local
//! engine, exercised with `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use api::{router, ApiSettings, AppState};
use client::{BoundaryError, CreatedTask, OrchestrationClient, TaskRequest, TaskSnapshot};
use db::MemoryStore;
use engine::{LocalEngine, LocalEngineConfig, WorkflowCatalog};
use handlers::{data_pipeline::ExtractSales, HandlerRegistry};

fn local_engine() -> LocalEngine {
    let mut registry = HandlerRegistry::with_reference_handlers();
    registry.register(ExtractSales::with_failure_rate(0.0));
    let catalog = WorkflowCatalog::with_reference_workflows(&registry).unwrap();
    let config = LocalEngineConfig {
        max_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(50),
        seed: Some(7),
    };
    LocalEngine::new(catalog, Arc::new(registry), config).unwrap()
}

fn app_with(client: Arc<dyn OrchestrationClient>) -> Router {
    let state = AppState::new(Arc::new(MemoryStore::new()), client, ApiSettings::default());
    router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn task_uuid(value: &Value) -> Uuid {
    value.as_str().and_then(|s| s.parse().ok()).unwrap()
}

fn order_body() -> Value {
    json!({
        "customer_email": "buyer@example.com",
        "cart_items": [
            { "sku": "SKU-1", "name": "Widget", "quantity": 2, "unit_price": 29.99 },
            { "sku": "SKU-2", "name": "Gadget", "quantity": 1, "unit_price": 49.99 }
        ],
        "payment_token": "tok_test_success"
    })
}

fn refund_body() -> Value {
    json!({
        "ticket_id": "TKT-200",
        "customer_id": "gold-9",
        "payment_id": "pay_200",
        "refund_amount": 75.5,
        "customer_email": "buyer@example.com",
        "refund_reason": "damaged"
    })
}

/// Delegates to a local engine but refuses one namespace, either at
/// creation or only when its tasks are queried.
struct FlakyNamespace {
    engine: LocalEngine,
    namespace: &'static str,
    fail_reads_only: bool,
    hidden: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl OrchestrationClient for FlakyNamespace {
    async fn create_task(&self, request: TaskRequest) -> Result<CreatedTask, BoundaryError> {
        let flaky = request.namespace == self.namespace;
        if flaky && !self.fail_reads_only {
            return Err(BoundaryError::Transport("connection refused".into()));
        }
        let created = self.engine.create_task(request).await?;
        if flaky {
            self.hidden.lock().unwrap().push(created.task_uuid);
        }
        Ok(created)
    }

    async fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError> {
        if self.hidden.lock().unwrap().contains(&task_uuid) {
            return Err(BoundaryError::Rejected {
                status: 503,
                body: "namespace unavailable".into(),
            });
        }
        self.engine.get_task(task_uuid).await
    }
}

struct Unreachable;

#[async_trait]
impl OrchestrationClient for Unreachable {
    async fn create_task(&self, _request: TaskRequest) -> Result<CreatedTask, BoundaryError> {
        Err(BoundaryError::Transport("connection refused".into()))
    }

    async fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError> {
        Err(BoundaryError::NotFound(task_uuid))
    }
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn health_reports_ok() {
    let app = app_with(Arc::new(local_engine()));
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ============================================================
// Orders
// ============================================================

#[tokio::test]
async fn created_order_is_processing_and_completes() {
    let engine = local_engine();
    let app = app_with(Arc::new(engine.clone()));

    let (status, body) = send(&app, "POST", "/orders", Some(order_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["kind"], "order");

    let task = task_uuid(&body["data"]["task_uuid"]);
    engine.wait_for_completion(task).await.unwrap();

    let id = body["data"]["id"].as_str().unwrap();
    let (status, body) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let view = &body["data"]["tasks"]["ecommerce"];
    assert_eq!(view["state"], "available");
    assert_eq!(view["task"]["status"], "complete");
    assert_eq!(view["task"]["total_steps"], 5);
}

#[tokio::test]
async fn empty_cart_is_rejected_before_anything_is_stored() {
    let app = app_with(Arc::new(local_engine()));
    let body = json!({ "customer_email": "buyer@example.com", "cart_items": [] });

    let (status, body) = send(&app, "POST", "/orders", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("cart is empty"));
}

#[tokio::test]
async fn unreachable_orchestration_leaves_order_pending() {
    let app = app_with(Arc::new(Unreachable));

    let (status, body) = send(&app, "POST", "/orders", Some(order_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["task_uuid"].is_null());
    assert!(body["data"]["task_uuids"]["ecommerce"].is_null());

    let id = body["data"]["id"].as_str().unwrap();
    let (status, body) = send(&app, "GET", &format!("/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tasks"]["ecommerce"]["state"], "not_submitted");
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let app = app_with(Arc::new(local_engine()));

    let (status, _) = send(&app, "GET", &format!("/orders/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A record is only visible under its own kind.
    let (_, body) = send(&app, "POST", "/orders", Some(order_body())).await;
    let id = body["data"]["id"].as_str().unwrap();
    let (status, _) = send(&app, "GET", &format!("/analytics/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================
// Analytics jobs and service requests
// ============================================================

#[tokio::test]
async fn analytics_job_accepts_an_empty_body() {
    let engine = local_engine();
    let app = app_with(Arc::new(engine.clone()));

    let (status, body) = send(&app, "POST", "/analytics/jobs", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "processing");

    let snapshot = engine
        .wait_for_completion(task_uuid(&body["data"]["task_uuid"]))
        .await
        .unwrap();
    assert_eq!(snapshot.total_steps, 8);
}

#[tokio::test]
async fn analytics_job_with_bad_granularity_is_rejected() {
    let app = app_with(Arc::new(local_engine()));
    let (status, _) = send(
        &app,
        "POST",
        "/analytics/jobs",
        Some(json!({ "granularity": "hourly" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn service_request_runs_the_registration_workflow() {
    let engine = local_engine();
    let app = app_with(Arc::new(engine.clone()));
    let body = json!({ "email": "new.user@example.com", "full_name": "New User", "plan": "pro" });

    let (status, body) = send(&app, "POST", "/services/requests", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let task = task_uuid(&body["data"]["task_uuid"]);
    engine.wait_for_completion(task).await.unwrap();

    let id = body["data"]["id"].as_str().unwrap();
    let (_, body) = send(&app, "GET", &format!("/services/requests/{id}"), None).await;
    assert_eq!(body["data"]["tasks"]["microservices"]["task"]["status"], "complete");
}

#[tokio::test]
async fn service_request_without_full_name_is_rejected() {
    let app = app_with(Arc::new(local_engine()));
    let (status, _) = send(
        &app,
        "POST",
        "/services/requests",
        Some(json!({ "email": "new.user@example.com", "full_name": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================
// Compliance refunds
// ============================================================

#[tokio::test]
async fn refund_spans_both_namespaces_under_one_correlation() {
    let engine = local_engine();
    let app = app_with(Arc::new(engine.clone()));

    let (status, body) = send(&app, "POST", "/compliance/refunds", Some(refund_body())).await;
    assert_eq!(status, StatusCode::CREATED);

    let data = &body["data"];
    assert_eq!(data["status"], "processing");
    assert!(data["correlation_id"].is_string());
    let cs_task = task_uuid(&data["task_uuids"]["customer_success"]);
    let payments_task = task_uuid(&data["task_uuids"]["payments"]);
    assert_eq!(task_uuid(&data["task_uuid"]), cs_task);

    engine.wait_for_completion(cs_task).await.unwrap();
    engine.wait_for_completion(payments_task).await.unwrap();

    let id = data["id"].as_str().unwrap();
    let (status, body) = send(&app, "GET", &format!("/compliance/refunds/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = &body["data"]["tasks"];
    assert_eq!(tasks["customer_success"]["task"]["total_steps"], 5);
    assert_eq!(tasks["payments"]["task"]["total_steps"], 4);
}

#[tokio::test]
async fn refund_with_failed_payments_submission_is_pending() {
    let client = Arc::new(FlakyNamespace {
        engine: local_engine(),
        namespace: "payments",
        fail_reads_only: false,
        hidden: Mutex::new(Vec::new()),
    });
    let app = app_with(client);

    let (status, body) = send(&app, "POST", "/compliance/refunds", Some(refund_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["task_uuid"].is_string());
    assert!(body["data"]["task_uuids"]["payments"].is_null());
}

#[tokio::test]
async fn unavailable_namespace_degrades_to_unknown() {
    let client = Arc::new(FlakyNamespace {
        engine: local_engine(),
        namespace: "payments",
        fail_reads_only: true,
        hidden: Mutex::new(Vec::new()),
    });
    let app = app_with(client);

    let (_, body) = send(&app, "POST", "/compliance/refunds", Some(refund_body())).await;
    let id = body["data"]["id"].as_str().unwrap();

    let (status, body) = send(&app, "GET", &format!("/compliance/refunds/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = &body["data"]["tasks"];
    assert_eq!(tasks["customer_success"]["state"], "available");
    assert_eq!(tasks["payments"]["state"], "unknown");
    assert!(tasks["payments"]["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn refund_with_unsupported_payment_method_is_rejected() {
    let app = app_with(Arc::new(local_engine()));
    let mut body = refund_body();
    body["payment_method"] = json!("barter");

    let (status, _) = send(&app, "POST", "/compliance/refunds", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refund_missing_a_required_field_is_a_json_bad_request() {
    let app = app_with(Arc::new(local_engine()));
    let mut body = refund_body();
    body.as_object_mut().unwrap().remove("payment_id");

    let (status, body) = send(&app, "POST", "/compliance/refunds", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("payment_id"));
}
