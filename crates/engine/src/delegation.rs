//! Cross-namespace delegation.
//!
//! One business event becomes one task per namespace, all sharing a fresh
//! correlation id. Each request carries its own deterministic idempotency key
//! so a retried submission never duplicates a task. Every request is
//! submitted even if an earlier one failed, and status queries fetch each
//! namespace independently so one unavailable namespace never hides the
//! others.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use client::{CorrelationEnvelope, OrchestrationClient, TaskRequest, TaskSnapshot};

/// One workflow to start for the event.
#[derive(Debug, Clone)]
pub struct DelegationTarget {
    pub namespace: String,
    pub workflow: String,
    pub context: Value,
    /// Workflow version to request; the boundary default when `None`.
    pub version: Option<String>,
}

impl DelegationTarget {
    pub fn new(namespace: impl Into<String>, workflow: impl Into<String>, context: Value) -> Self {
        Self {
            namespace: namespace.into(),
            workflow: workflow.into(),
            context,
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// What happened when an event was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationOutcome {
    pub correlation_id: Uuid,
    /// Namespace of the first target; its task id goes on the domain record.
    pub primary_namespace: String,
    /// Every namespace, with `None` where submission failed.
    pub task_uuids: BTreeMap<String, Option<Uuid>>,
    /// Submission error per failed namespace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl DelegationOutcome {
    pub fn primary_task(&self) -> Option<Uuid> {
        self.task_uuids.get(&self.primary_namespace).copied().flatten()
    }

    pub fn fully_submitted(&self) -> bool {
        self.task_uuids.values().all(Option::is_some)
    }

    pub fn nothing_submitted(&self) -> bool {
        self.task_uuids.values().all(Option::is_none)
    }
}

/// Status of one namespace in a merged view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NamespaceStatus {
    Available { task: TaskSnapshot },
    /// The fetch failed; the task may still be running.
    Unknown { task_uuid: Uuid, error: String },
    /// Task creation failed, so there is nothing to fetch.
    NotSubmitted,
}

#[derive(Clone)]
pub struct Delegator {
    client: Arc<dyn OrchestrationClient>,
}

impl Delegator {
    pub fn new(client: Arc<dyn OrchestrationClient>) -> Self {
        Self { client }
    }

    /// Submit one task per target under a fresh correlation id.
    ///
    /// Never fails as a whole: per-namespace failures are recorded in the
    /// outcome. Nothing is retried here.
    #[instrument(skip(self, targets))]
    pub async fn submit(
        &self,
        record_kind: &str,
        record_id: &str,
        targets: Vec<DelegationTarget>,
    ) -> DelegationOutcome {
        let correlation_id = Uuid::new_v4();
        let primary_namespace = targets
            .first()
            .map(|t| t.namespace.clone())
            .unwrap_or_default();

        let mut task_uuids = BTreeMap::new();
        let mut errors = BTreeMap::new();

        for target in targets {
            let envelope =
                CorrelationEnvelope::for_record(correlation_id, record_kind, record_id, &target.namespace);
            let mut request = TaskRequest::new(&target.namespace, &target.workflow, target.context, envelope)
                .with_reason(format!("{record_kind} {record_id}"))
                .with_tags([record_kind.to_string(), target.namespace.clone()]);
            if let Some(version) = target.version {
                request = request.with_version(version);
            }

            match self.client.create_task(request).await {
                Ok(created) => {
                    info!("{} task {} created for {} {}", target.namespace, created.task_uuid, record_kind, record_id);
                    task_uuids.insert(target.namespace, Some(created.task_uuid));
                }
                Err(err) => {
                    warn!("{} task creation failed for {} {}: {}", target.namespace, record_kind, record_id, err);
                    errors.insert(target.namespace.clone(), err.to_string());
                    task_uuids.insert(target.namespace, None);
                }
            }
        }

        DelegationOutcome {
            correlation_id,
            primary_namespace,
            task_uuids,
            errors,
        }
    }

    /// Fetch every namespace's task concurrently.
    pub async fn merged_status(
        &self,
        task_uuids: &BTreeMap<String, Option<Uuid>>,
    ) -> BTreeMap<String, NamespaceStatus> {
        let fetches = task_uuids.iter().map(|(namespace, task_uuid)| async move {
            let status = match task_uuid {
                None => NamespaceStatus::NotSubmitted,
                Some(task_uuid) => match self.client.get_task(*task_uuid).await {
                    Ok(task) => NamespaceStatus::Available { task },
                    Err(err) => {
                        warn!("status of {} task {} unavailable: {}", namespace, task_uuid, err);
                        NamespaceStatus::Unknown {
                            task_uuid: *task_uuid,
                            error: err.to_string(),
                        }
                    }
                },
            };
            (namespace.clone(), status)
        });

        join_all(fetches).await.into_iter().collect()
    }
}
