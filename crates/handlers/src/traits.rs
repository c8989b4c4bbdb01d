//! The `StepHandler` trait and the values that flow through it.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::codes;
use crate::StepError;

// ---------------------------------------------------------------------------
// TaskInputs
// ---------------------------------------------------------------------------

/// Typed task-level input for one step.
///
/// Implementors are plain serde structs; `validate` runs once, right after
/// deserialization, and may only fail with a permanent error.
pub trait StepInput: DeserializeOwned {
    fn validate(&self) -> Result<(), StepError> {
        Ok(())
    }
}

/// Read-only task context supplied at task creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskInputs(Value);

impl TaskInputs {
    pub fn new(context: Value) -> Self {
        Self(context)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Deserialize the context into `T` and run its validation.
    pub fn parse<T: StepInput>(&self) -> Result<T, StepError> {
        let context = match &self.0 {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        let parsed: T = serde_json::from_value(context)
            .map_err(|e| StepError::invalid_input(format!("invalid task context: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// The immutable output of one completed step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepResult(Map<String, Value>);

impl StepResult {
    /// Serialize a typed result struct. Anything that is not a JSON object is
    /// rejected, since downstream steps read results by field name.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, StepError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(StepError::permanent(
                format!("step result must be an object, got {other}"),
                codes::INVALID_DEPENDENCY,
            )),
            Err(e) => Err(StepError::permanent(
                format!("step result could not be serialized: {e}"),
                codes::INVALID_DEPENDENCY,
            )),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Read this result back as a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.to_value()).map_err(|e| {
            StepError::permanent(
                format!("malformed upstream result: {e}"),
                codes::INVALID_DEPENDENCY,
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Upstream results projected under the aliases a step declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    by_alias: BTreeMap<String, StepResult>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, result: StepResult) {
        self.by_alias.insert(alias.into(), result);
    }

    /// Typed read of one dependency.
    ///
    /// A missing alias is a permanent `MISSING_DEPENDENCY` error.
    pub fn get<T: DeserializeOwned>(&self, alias: &str) -> Result<T, StepError> {
        self.raw(alias)
            .ok_or_else(|| StepError::missing_dependency(alias))?
            .parse()
    }

    pub fn raw(&self, alias: &str) -> Option<&StepResult> {
        self.by_alias.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.by_alias.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}

impl FromIterator<(String, StepResult)> for Dependencies {
    fn from_iter<I: IntoIterator<Item = (String, StepResult)>>(iter: I) -> Self {
        Self {
            by_alias: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Per-invocation context handed to every step handler.
///
/// All randomness a handler uses must come from [`StepContext::rng`] so a
/// run can be replayed from its seed.
pub struct StepContext {
    /// Task this invocation belongs to.
    pub task_uuid: Uuid,
    /// Name of the step being executed.
    pub step_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    rng: Box<dyn RngCore + Send>,
}

impl StepContext {
    pub fn new(
        task_uuid: Uuid,
        step_name: impl Into<String>,
        attempt: u32,
        rng: impl RngCore + Send + 'static,
    ) -> Self {
        Self {
            task_uuid,
            step_name: step_name.into(),
            attempt,
            rng: Box::new(rng),
        }
    }

    /// Context backed by a `StdRng` seeded with `seed`.
    pub fn seeded(task_uuid: Uuid, step_name: impl Into<String>, attempt: u32, seed: u64) -> Self {
        Self::new(task_uuid, step_name, attempt, StdRng::seed_from_u64(seed))
    }

    pub fn rng(&mut self) -> &mut dyn RngCore {
        self.rng.as_mut()
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("task_uuid", &self.task_uuid)
            .field("step_name", &self.step_name)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// StepHandler
// ---------------------------------------------------------------------------

/// The core step handler trait.
///
/// A handler is a pure computation over the task context and its declared
/// upstream results. It never blocks on I/O and keeps no state between calls.
pub trait StepHandler: Send + Sync {
    /// Name the handler is registered under.
    fn name(&self) -> &str;

    fn execute(
        &self,
        inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError>;
}
