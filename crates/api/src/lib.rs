//! `api` crate: HTTP surface over the domain records.
//!
//! Exposes:
//!   POST   /orders                    GET /orders/:id
//!   POST   /analytics/jobs            GET /analytics/jobs/:id
//!   POST   /services/requests         GET /services/requests/:id
//!   POST   /compliance/refunds        GET /compliance/refunds/:id
//!   GET    /health

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use error::ApiError;
pub use routes::records::{ApiResponse, RecordView};
pub use state::{ApiSettings, AppState};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/orders", post(routes::orders::create))
        .route("/orders/:id", get(routes::orders::get))
        .route("/analytics/jobs", post(routes::analytics::create))
        .route("/analytics/jobs/:id", get(routes::analytics::get))
        .route("/services/requests", post(routes::services::create))
        .route("/services/requests/:id", get(routes::services::get))
        .route("/compliance/refunds", post(routes::compliance::create))
        .route("/compliance/refunds/:id", get(routes::compliance::get))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
