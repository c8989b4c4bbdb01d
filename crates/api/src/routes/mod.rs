//! Route handlers, one module per record kind.

pub mod analytics;
pub mod compliance;
pub mod orders;
pub mod records;
pub mod services;

use axum::Json;
use serde_json::{json, Value};

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "flowbridge-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
