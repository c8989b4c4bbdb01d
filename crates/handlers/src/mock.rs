//! `MockHandler`, a test double for `StepHandler`.
//!
//! Useful in engine and API tests where the reference handlers are either
//! irrelevant or would make the outcome depend on business rules.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::error::codes;
use crate::traits::{Dependencies, StepContext, StepHandler, StepResult, TaskInputs};
use crate::StepError;

/// Behaviour injected into `MockHandler` at construction time.
pub enum MockBehaviour {
    /// Succeed with the given fields.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Permanent` error.
    FailPermanent(String),
    /// Fail with a `Retryable` error on the first `n` calls, then succeed.
    FailTimes(u32, Value),
}

/// A mock handler that records the dependencies of every call it receives
/// and returns a programmer-specified result.
pub struct MockHandler {
    /// Registry name.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Dependencies seen by this handler, in call order.
    pub calls: Arc<Mutex<Vec<Dependencies>>>,
}

impl MockHandler {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    pub fn failing_permanent(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailPermanent(msg.into()))
    }

    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// A mock that fails retryably `failures` times before returning `value`.
    pub fn flaky(name: impl Into<String>, failures: u32, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailTimes(failures, value))
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    /// Shared view of the call log, usable after the handler is moved into a registry.
    pub fn call_log(&self) -> Arc<Mutex<Vec<Dependencies>>> {
        Arc::clone(&self.calls)
    }

    fn output(&self, value: &Value) -> Result<StepResult, StepError> {
        // Tag the output with the handler name so tests can trace data flow.
        let mut out = json!({ "handler": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), value.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        StepResult::from_typed(&out)
    }
}

impl StepHandler for MockHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let calls = {
            let mut log = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            log.push(deps.clone());
            log.len() as u32
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => self.output(v),
            MockBehaviour::FailRetryable(msg) => Err(StepError::retryable(msg.clone())),
            MockBehaviour::FailPermanent(msg) => {
                Err(StepError::permanent(msg.clone(), codes::BUSINESS_RULE))
            }
            MockBehaviour::FailTimes(n, v) => {
                if calls <= *n {
                    Err(StepError::retryable(format!(
                        "{} attempt {} failed",
                        self.name, ctx.attempt
                    )))
                } else {
                    self.output(v)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn flaky_succeeds_after_failures() {
        let mock = MockHandler::flaky("m", 2, json!({ "ok": true }));
        let mut ctx = StepContext::seeded(Uuid::nil(), "m", 1, 0);
        let inputs = TaskInputs::default();
        let deps = Dependencies::new();

        assert!(mock.execute(&inputs, &deps, &mut ctx).unwrap_err().is_retryable());
        assert!(mock.execute(&inputs, &deps, &mut ctx).is_err());
        let out = mock.execute(&inputs, &deps, &mut ctx).unwrap();
        assert_eq!(out.get("ok"), Some(&json!(true)));
        assert_eq!(out.get("handler"), Some(&json!("m")));
        assert_eq!(mock.call_count(), 3);
    }
}
