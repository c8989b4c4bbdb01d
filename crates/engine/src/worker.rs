//! Step worker lifecycle.
//!
//! A [`StepWorker`] owns the wiring between the handler registry and the
//! dispatch channel. It is started exactly once; starting it again would
//! leave two loops competing for the same registry, so the second call is
//! rejected. There is no `stop`: the loop ends when every handle is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use handlers::{Dependencies, HandlerRegistry, StepContext, StepError, StepResult, TaskInputs};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::WorkerError;

/// Capacity of the dispatch channel.
const DISPATCH_BUFFER: usize = 256;

/// One step invocation.
#[derive(Debug, Clone)]
pub struct StepJob {
    pub task_uuid: Uuid,
    pub step_name: String,
    pub handler: String,
    pub inputs: Arc<TaskInputs>,
    pub dependencies: Dependencies,
    /// 1-based.
    pub attempt: u32,
    pub seed: u64,
}

type Reply = oneshot::Sender<Result<StepResult, StepError>>;

pub struct StepWorker {
    registry: Arc<HandlerRegistry>,
    started: AtomicBool,
}

impl StepWorker {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the dispatch loop. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// [`WorkerError::AlreadyStarted`] on every call after the first.
    pub fn start(&self) -> Result<WorkerHandle, WorkerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(DISPATCH_BUFFER);
        tokio::spawn(dispatch_loop(Arc::clone(&self.registry), rx));
        info!("step worker started with {} handlers", self.registry.len());

        Ok(WorkerHandle {
            tx,
            registry: Arc::clone(&self.registry),
        })
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Cloneable sender side of a started worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<(StepJob, Reply)>,
    registry: Arc<HandlerRegistry>,
}

impl WorkerHandle {
    /// Run one step and wait for its outcome.
    ///
    /// The outer error is about the worker itself; the inner `Result` is the
    /// handler's own outcome.
    pub async fn dispatch(&self, job: StepJob) -> Result<Result<StepResult, StepError>, WorkerError> {
        if !self.registry.contains(&job.handler) {
            return Err(WorkerError::UnknownHandler(job.handler));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((job, reply_tx))
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }
}

async fn dispatch_loop(registry: Arc<HandlerRegistry>, mut rx: mpsc::Receiver<(StepJob, Reply)>) {
    while let Some((job, reply)) = rx.recv().await {
        let Some(handler) = registry.get(&job.handler) else {
            error!("handler '{}' vanished from registry", job.handler);
            continue;
        };

        // Each job runs on its own blocking task so sibling steps overlap.
        tokio::spawn(async move {
            let step_name = job.step_name.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let mut ctx = StepContext::seeded(job.task_uuid, job.step_name, job.attempt, job.seed);
                handler.execute(&job.inputs, &job.dependencies, &mut ctx)
            })
            .await
            .unwrap_or_else(|e| {
                Err(StepError::permanent(
                    format!("step handler panicked: {e}"),
                    handlers::error::codes::INTERNAL,
                ))
            });

            debug!("step '{}' finished, ok={}", step_name, outcome.is_ok());
            // The requester may have gone away; nothing to do then.
            let _ = reply.send(outcome);
        });
    }
    debug!("step worker dispatch loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use handlers::mock::MockHandler;
    use serde_json::json;

    struct Explodes;

    impl handlers::StepHandler for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }

        fn execute(
            &self,
            _inputs: &TaskInputs,
            _deps: &Dependencies,
            _ctx: &mut StepContext,
        ) -> Result<StepResult, StepError> {
            panic!("boom")
        }
    }

    fn registry() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(MockHandler::returning("echo", json!({ "ok": true })));
        registry.register(Explodes);
        Arc::new(registry)
    }

    fn job(handler: &str) -> StepJob {
        StepJob {
            task_uuid: Uuid::nil(),
            step_name: "s".into(),
            handler: handler.into(),
            inputs: Arc::new(TaskInputs::default()),
            dependencies: Dependencies::new(),
            attempt: 1,
            seed: 0,
        }
    }

    #[tokio::test]
    async fn start_is_single_shot() {
        let worker = StepWorker::new(registry());
        assert!(!worker.is_started());

        let _handle = worker.start().expect("first start succeeds");
        assert!(worker.is_started());
        assert_eq!(worker.start().err(), Some(WorkerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn dispatch_runs_the_handler() {
        let handle = StepWorker::new(registry()).start().unwrap();
        let result = handle.dispatch(job("echo")).await.unwrap().unwrap();
        assert_eq!(result.get("ok"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn unknown_handler_is_rejected_before_dispatch() {
        let handle = StepWorker::new(registry()).start().unwrap();
        assert_eq!(
            handle.dispatch(job("nope")).await.unwrap_err(),
            WorkerError::UnknownHandler("nope".into())
        );
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let handle = StepWorker::new(registry()).start().unwrap();
        let err = handle.dispatch(job("explodes")).await.unwrap().unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), Some(handlers::error::codes::INTERNAL));
        assert!(err.message().contains("panicked"));
    }
}
