//! In-process orchestration engine.
//!
//! `LocalEngine` implements [`OrchestrationClient`] without a remote
//! service:
//! 1. `create_task` looks the workflow up in the catalog, deduplicates on the
//!    idempotency key and spawns a driver for the new task.
//! 2. The driver asks the resolver for runnable steps, dispatches them through
//!    the step worker concurrently and records each outcome.
//! 3. Retryable failures are retried with exponential back-off up to
//!    `max_attempts`; after that the step fails permanently.
//! 4. A permanent failure leaves every dependent step `pending` and the task
//!    ends in `error` once the reachable steps have settled.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use client::{
    BoundaryError, CreatedTask, OrchestrationClient, StepSnapshot, StepState, TaskRequest,
    TaskSnapshot, TaskStatus,
};
use handlers::error::codes;
use handlers::{Dependencies, HandlerRegistry, StepError, TaskInputs};

use crate::catalog::WorkflowCatalog;
use crate::models::WorkflowDefinition;
use crate::resolver::{self, Outcomes, Resolution, StepOutcome};
use crate::worker::{StepJob, StepWorker, WorkerHandle};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the local engine.
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Attempts per step, counting the first one.
    pub max_attempts: u32,
    /// Base delay for exponential back-off between attempts.
    pub retry_base_delay: Duration,
    /// Upper bound on a single back-off delay.
    pub max_retry_delay: Duration,
    /// Seed for every step's random source. `None` draws a fresh seed per task.
    pub seed: Option<u64>,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(30),
            seed: None,
        }
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`. Never overflows.
pub(crate) fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |delay| delay.min(max))
}

// ---------------------------------------------------------------------------
// Per-task state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StepProgress {
    state: StepState,
    attempts: u32,
    error: Option<String>,
}

impl Default for StepProgress {
    fn default() -> Self {
        Self {
            state: StepState::Pending,
            attempts: 0,
            error: None,
        }
    }
}

struct TaskRecord {
    definition: Arc<WorkflowDefinition>,
    inputs: Arc<TaskInputs>,
    seed: u64,
    outcomes: Outcomes,
    progress: BTreeMap<String, StepProgress>,
    status_tx: watch::Sender<TaskStatus>,
    status_rx: watch::Receiver<TaskStatus>,
}

impl TaskRecord {
    fn status(&self) -> TaskStatus {
        *self.status_rx.borrow()
    }

    fn snapshot(&self, task_uuid: Uuid) -> TaskSnapshot {
        let steps = self
            .definition
            .steps
            .iter()
            .map(|step| {
                let progress = self.progress.get(&step.name).cloned().unwrap_or_default();
                StepSnapshot {
                    name: step.name.clone(),
                    current_state: progress.state,
                    attempts: progress.attempts,
                    result: self
                        .outcomes
                        .get(&step.name)
                        .and_then(StepOutcome::result)
                        .map(|r| r.to_value()),
                    error: progress.error,
                }
            })
            .collect();

        TaskSnapshot {
            task_uuid,
            namespace: self.definition.namespace.clone(),
            name: self.definition.name.clone(),
            status: self.status(),
            total_steps: self.definition.steps.len(),
            steps,
        }
    }
}

// ---------------------------------------------------------------------------
// LocalEngine
// ---------------------------------------------------------------------------

struct Inner {
    catalog: WorkflowCatalog,
    worker: StepWorker,
    handle: WorkerHandle,
    config: LocalEngineConfig,
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    idempotency: Mutex<HashMap<String, Uuid>>,
    task_counter: AtomicU64,
}

/// Cheap to clone; all clones share the same tasks.
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<Inner>,
}

impl LocalEngine {
    /// Build an engine and start its step worker. Must be called from within
    /// a Tokio runtime.
    pub fn new(
        catalog: WorkflowCatalog,
        registry: Arc<HandlerRegistry>,
        config: LocalEngineConfig,
    ) -> Result<Self, EngineError> {
        let worker = StepWorker::new(registry);
        let handle = worker.start()?;

        Ok(Self {
            inner: Arc::new(Inner {
                catalog,
                worker,
                handle,
                config,
                tasks: RwLock::new(HashMap::new()),
                idempotency: Mutex::new(HashMap::new()),
                task_counter: AtomicU64::new(0),
            }),
        })
    }

    /// Engine over the reference handlers and workflows.
    pub fn with_reference_workflows(config: LocalEngineConfig) -> Result<Self, EngineError> {
        let registry = HandlerRegistry::with_reference_handlers();
        let catalog = WorkflowCatalog::with_reference_workflows(&registry)?;
        Self::new(catalog, Arc::new(registry), config)
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.inner.catalog
    }

    pub fn is_worker_started(&self) -> bool {
        self.inner.worker.is_started()
    }

    /// Block until the task reaches `complete` or `error`, then return it.
    pub async fn wait_for_completion(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError> {
        let mut rx = {
            let tasks = self.inner.tasks.read().await;
            let record = tasks.get(&task_uuid).ok_or(BoundaryError::NotFound(task_uuid))?;
            record.status_rx.clone()
        };

        while !rx.borrow().is_terminal() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.snapshot(task_uuid).await
    }

    /// Create a task and wait for it to finish.
    pub async fn run_to_completion(&self, request: TaskRequest) -> Result<TaskSnapshot, EngineError> {
        let created = self.create_task(request).await?;
        Ok(self.wait_for_completion(created.task_uuid).await?)
    }

    /// Steps of the task not cut off by a permanent failure.
    pub async fn reachable_step_count(&self, task_uuid: Uuid) -> Result<usize, BoundaryError> {
        let tasks = self.inner.tasks.read().await;
        let record = tasks.get(&task_uuid).ok_or(BoundaryError::NotFound(task_uuid))?;
        Ok(resolver::reachable_step_count(&record.definition, &record.outcomes))
    }

    async fn snapshot(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError> {
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(&task_uuid)
            .map(|record| record.snapshot(task_uuid))
            .ok_or(BoundaryError::NotFound(task_uuid))
    }

    fn next_seed(&self) -> u64 {
        let n = self.inner.task_counter.fetch_add(1, Ordering::SeqCst);
        match self.inner.config.seed {
            Some(seed) => seed.wrapping_add(n),
            None => rand::random(),
        }
    }

    // -----------------------------------------------------------------------
    // Task driver
    // -----------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn drive(&self, task_uuid: Uuid) {
        let Some((definition, inputs, seed)) = self.task_parts(task_uuid).await else {
            error!("task {} disappeared before it started", task_uuid);
            return;
        };

        self.set_status(task_uuid, TaskStatus::InProgress).await;

        let mut dispatched: HashSet<String> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            for (step, deps) in self.ready_steps(task_uuid, &definition, &dispatched).await {
                dispatched.insert(step.clone());
                let run = self.run_step(
                    task_uuid,
                    Arc::clone(&definition),
                    Arc::clone(&inputs),
                    seed,
                    step.clone(),
                    deps,
                );
                // A panic inside one step must not take the driver down with it.
                in_flight.push(AssertUnwindSafe(run).catch_unwind().map(move |result| {
                    result.unwrap_or_else(|_| {
                        let err = StepError::permanent("step execution panicked", codes::INTERNAL);
                        (step, StepOutcome::PermanentFailure(err))
                    })
                }));
            }

            match in_flight.next().await {
                Some((step, outcome)) => self.record_outcome(task_uuid, step, outcome).await,
                None => break,
            }
        }

        self.finish(task_uuid).await;
    }

    async fn task_parts(&self, task_uuid: Uuid) -> Option<(Arc<WorkflowDefinition>, Arc<TaskInputs>, u64)> {
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(&task_uuid)
            .map(|r| (Arc::clone(&r.definition), Arc::clone(&r.inputs), r.seed))
    }

    /// Runnable steps not yet dispatched, with their resolved dependencies.
    async fn ready_steps(
        &self,
        task_uuid: Uuid,
        definition: &WorkflowDefinition,
        dispatched: &HashSet<String>,
    ) -> Vec<(String, Dependencies)> {
        let tasks = self.inner.tasks.read().await;
        let Some(record) = tasks.get(&task_uuid) else {
            return Vec::new();
        };

        resolver::runnable_steps(definition, &record.outcomes)
            .into_iter()
            .filter(|step| !dispatched.contains(step))
            .filter_map(|step| match resolver::resolve(definition, &step, &record.outcomes) {
                Ok(Resolution::Ready(deps)) => Some((step, deps)),
                _ => None,
            })
            .collect()
    }

    /// Execute one step until it succeeds, fails permanently, or runs out of
    /// attempts.
    async fn run_step(
        &self,
        task_uuid: Uuid,
        definition: Arc<WorkflowDefinition>,
        inputs: Arc<TaskInputs>,
        seed: u64,
        step: String,
        deps: Dependencies,
    ) -> (String, StepOutcome) {
        let max_attempts = self.inner.config.max_attempts.max(1);
        let (index, handler) = match definition.steps.iter().position(|s| s.name == step) {
            Some(i) => (i as u64, definition.steps[i].handler.clone()),
            None => {
                let err = StepError::permanent(format!("unknown step '{step}'"), codes::INVALID_DEPENDENCY);
                return (step, StepOutcome::PermanentFailure(err));
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.update_progress(task_uuid, &step, |p| {
                p.state = StepState::InProgress;
                p.attempts = attempt;
            })
            .await;

            let job = StepJob {
                task_uuid,
                step_name: step.clone(),
                handler: handler.clone(),
                inputs: Arc::clone(&inputs),
                dependencies: deps.clone(),
                attempt,
                seed: seed.wrapping_mul(31).wrapping_add(index * 1_000 + u64::from(attempt)),
            };

            let err = match self.inner.handle.dispatch(job).await {
                Ok(Ok(result)) => return (step, StepOutcome::Succeeded(result)),
                Ok(Err(err)) => err,
                Err(worker_err) => StepError::permanent(worker_err.to_string(), codes::INVALID_DEPENDENCY),
            };

            if !err.is_retryable() {
                return (step, StepOutcome::PermanentFailure(err));
            }
            if attempt >= max_attempts {
                let exhausted = StepError::permanent(
                    format!("retries exhausted after {attempt} attempts: {}", err.message()),
                    codes::RETRIES_EXHAUSTED,
                );
                return (step, StepOutcome::PermanentFailure(exhausted));
            }

            let delay = retry_delay(
                self.inner.config.retry_base_delay,
                self.inner.config.max_retry_delay,
                attempt,
            );
            warn!(
                "step '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                step,
                attempt,
                max_attempts,
                delay,
                err.message()
            );
            self.update_progress(task_uuid, &step, |p| {
                p.state = StepState::WaitingForRetry;
                p.error = Some(err.message().to_string());
            })
            .await;

            tokio::time::sleep(delay).await;
        }
    }

    async fn update_progress(&self, task_uuid: Uuid, step: &str, f: impl FnOnce(&mut StepProgress)) {
        let mut tasks = self.inner.tasks.write().await;
        if let Some(record) = tasks.get_mut(&task_uuid) {
            f(record.progress.entry(step.to_string()).or_default());
        }
    }

    async fn record_outcome(&self, task_uuid: Uuid, step: String, outcome: StepOutcome) {
        let mut tasks = self.inner.tasks.write().await;
        let Some(record) = tasks.get_mut(&task_uuid) else {
            return;
        };

        let progress = record.progress.entry(step.clone()).or_default();
        match &outcome {
            StepOutcome::Succeeded(_) => {
                info!("step '{}' complete", step);
                progress.state = StepState::Complete;
                progress.error = None;
            }
            StepOutcome::PermanentFailure(err) | StepOutcome::RetryableFailure(err) => {
                error!("step '{}' failed: {}", step, err);
                progress.state = StepState::Error;
                progress.error = Some(err.message().to_string());
            }
        }
        record.outcomes.insert(step, outcome);
    }

    async fn finish(&self, task_uuid: Uuid) {
        let tasks = self.inner.tasks.read().await;
        let Some(record) = tasks.get(&task_uuid) else {
            return;
        };

        let all_succeeded = record.definition.steps.iter().all(|s| {
            matches!(record.outcomes.get(&s.name), Some(StepOutcome::Succeeded(_)))
        });
        let status = if all_succeeded {
            TaskStatus::Complete
        } else {
            TaskStatus::Error
        };

        info!(
            "task {} ({}) finished: {:?}, {}/{} reachable steps",
            task_uuid,
            record.definition.qualified_name(),
            status,
            resolver::reachable_step_count(&record.definition, &record.outcomes),
            record.definition.steps.len()
        );
        // Receivers live in the record itself, so send cannot fail here.
        let _ = record.status_tx.send(status);
    }

    /// Mark a task whose driver died as failed so waiters are released.
    async fn abandon(&self, task_uuid: Uuid) {
        let tasks = self.inner.tasks.read().await;
        if let Some(record) = tasks.get(&task_uuid) {
            if !record.status().is_terminal() {
                let _ = record.status_tx.send(TaskStatus::Error);
            }
        }
    }

    async fn set_status(&self, task_uuid: Uuid, status: TaskStatus) {
        let tasks = self.inner.tasks.read().await;
        if let Some(record) = tasks.get(&task_uuid) {
            let _ = record.status_tx.send(status);
        }
    }
}

#[async_trait]
impl OrchestrationClient for LocalEngine {
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name))]
    async fn create_task(&self, request: TaskRequest) -> Result<CreatedTask, BoundaryError> {
        let definition = self
            .inner
            .catalog
            .get(&request.namespace, &request.name)
            .ok_or_else(|| BoundaryError::UnknownWorkflow {
                namespace: request.namespace.clone(),
                name: request.name.clone(),
            })?;

        let mut keys = self.inner.idempotency.lock().await;
        if let Some(&task_uuid) = keys.get(&request.envelope.idempotency_key) {
            info!(
                "idempotency key {} already used, returning task {}",
                request.envelope.idempotency_key, task_uuid
            );
            return Ok(CreatedTask { task_uuid });
        }

        let task_uuid = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Pending);
        let context = match request.context {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        self.inner.tasks.write().await.insert(
            task_uuid,
            TaskRecord {
                definition,
                inputs: Arc::new(TaskInputs::new(context)),
                seed: self.next_seed(),
                outcomes: Outcomes::new(),
                progress: BTreeMap::new(),
                status_tx,
                status_rx,
            },
        );
        keys.insert(request.envelope.idempotency_key, task_uuid);
        drop(keys);

        info!(
            "created task {} correlation_id={}",
            task_uuid, request.envelope.correlation_id
        );

        let engine = self.clone();
        tokio::spawn(async move {
            let driver = tokio::spawn({
                let engine = engine.clone();
                async move { engine.drive(task_uuid).await }
            });
            if let Err(e) = driver.await {
                error!("driver for task {} died: {}", task_uuid, e);
                engine.abandon(task_uuid).await;
            }
        });

        Ok(CreatedTask { task_uuid })
    }

    async fn get_task(&self, task_uuid: Uuid) -> Result<TaskSnapshot, BoundaryError> {
        self.snapshot(task_uuid).await
    }
}
