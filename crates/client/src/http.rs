//! `reqwest` implementation of the boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{CreatedTask, TaskRequest, TaskSnapshot};
use crate::{BoundaryError, OrchestrationClient};

/// Connection settings for a remote orchestration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Orchestration client over HTTP.
///
/// One pooled `reqwest::Client` is shared by every call, so a single
/// instance can be cloned into concurrent request handlers.
#[derive(Debug, Clone)]
pub struct HttpOrchestrationClient {
    config: ClientConfig,
    client: Client,
}

impl HttpOrchestrationClient {
    pub fn new(config: ClientConfig) -> Result<Self, BoundaryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn with_url_and_timeout(
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, BoundaryError> {
        Self::new(ClientConfig {
            base_url: base_url.into(),
            timeout_secs,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

/// Decode a 2xx body, or turn anything else into `Rejected`.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BoundaryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("orchestration service returned {}: {}", status, body);
        return Err(BoundaryError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BoundaryError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl OrchestrationClient for HttpOrchestrationClient {
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name))]
    async fn create_task(&self, request: TaskRequest) -> Result<CreatedTask, BoundaryError> {
        debug!("creating task, idempotency_key={}", request.envelope.idempotency_key);

        let response = self
            .client
            .post(self.url("/v1/tasks"))
            .json(&request)
            .send()
            .await?;

        decode(response).await
    }

    #[instrument(skip(self))]
    async fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/tasks/{task_uuid}")))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BoundaryError::NotFound(task_uuid));
        }
        let mut snapshot: TaskSnapshot = decode(response).await?;
        if snapshot.task_uuid.is_nil() {
            snapshot.task_uuid = task_uuid;
        }
        Ok(snapshot)
    }
}
