//! Dependency resolution for one task instance.
//!
//! Given a definition and the outcomes recorded so far, decide which steps
//! may run and build the exact `Dependencies` map each one receives.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use handlers::{Dependencies, StepError, StepResult};

use crate::models::WorkflowDefinition;
use crate::ResolveError;

/// What has happened to one step so far.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded(StepResult),
    /// Last attempt failed transiently; the step will run again.
    RetryableFailure(StepError),
    /// Terminal failure; every downstream step is unreachable.
    PermanentFailure(StepError),
}

impl StepOutcome {
    pub fn result(&self) -> Option<&StepResult> {
        match self {
            StepOutcome::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::RetryableFailure(_))
    }
}

/// Outcomes keyed by step name.
pub type Outcomes = BTreeMap<String, StepOutcome>;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Every upstream succeeded; these are the step's dependencies.
    Ready(Dependencies),
    /// Some upstreams have no successful result yet.
    Waiting { pending: Vec<String> },
}

/// Resolve the dependencies of `step`.
///
/// Only the declared upstreams are projected, each under its alias, so
/// unrelated results in `outcomes` never change the map.
pub fn resolve(
    definition: &WorkflowDefinition,
    step: &str,
    outcomes: &Outcomes,
) -> Result<Resolution, ResolveError> {
    let step_def = definition
        .step(step)
        .ok_or_else(|| ResolveError::UnknownStep(step.to_string()))?;

    if let Some(failed) = failed_ancestor(definition, step, outcomes) {
        return Err(ResolveError::DependencyUnresolved {
            step: step.to_string(),
            failed_upstream: failed,
        });
    }

    let mut deps = Dependencies::new();
    let mut pending = Vec::new();
    for dep in &step_def.depends_on {
        match outcomes.get(&dep.step).and_then(StepOutcome::result) {
            Some(result) => deps.insert(dep.alias.clone(), result.clone()),
            None => pending.push(dep.step.clone()),
        }
    }

    if pending.is_empty() {
        Ok(Resolution::Ready(deps))
    } else {
        Ok(Resolution::Waiting { pending })
    }
}

/// Steps with no terminal outcome whose upstreams have all succeeded, in
/// declaration order. A step whose last attempt failed retryably is runnable
/// again.
pub fn runnable_steps(definition: &WorkflowDefinition, outcomes: &Outcomes) -> Vec<String> {
    definition
        .steps
        .iter()
        .filter(|s| !outcomes.get(&s.name).is_some_and(StepOutcome::is_terminal))
        .filter(|s| {
            s.dependency_names()
                .all(|d| outcomes.get(d).and_then(StepOutcome::result).is_some())
        })
        .map(|s| s.name.clone())
        .collect()
}

/// Every step transitively downstream of a permanent failure. The failed
/// steps themselves are not included.
pub fn unreachable_steps(definition: &WorkflowDefinition, outcomes: &Outcomes) -> BTreeSet<String> {
    let mut unreachable = BTreeSet::new();
    let mut frontier: Vec<&str> = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, StepOutcome::PermanentFailure(_)))
        .map(|(name, _)| name.as_str())
        .collect();

    while let Some(name) = frontier.pop() {
        for child in definition.dependents_of(name) {
            if unreachable.insert(child.name.clone()) {
                frontier.push(child.name.as_str());
            }
        }
    }
    unreachable
}

/// Steps that can still complete or already have: the total minus the
/// unreachable branch.
pub fn reachable_step_count(definition: &WorkflowDefinition, outcomes: &Outcomes) -> usize {
    definition.steps.len() - unreachable_steps(definition, outcomes).len()
}

/// The first permanently failed step found among `step`'s ancestors.
fn failed_ancestor(definition: &WorkflowDefinition, step: &str, outcomes: &Outcomes) -> Option<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = definition
        .step(step)
        .map(|s| s.dependency_names().collect())
        .unwrap_or_default();

    while let Some(name) = stack.pop() {
        if !seen.insert(name) {
            continue;
        }
        if matches!(outcomes.get(name), Some(StepOutcome::PermanentFailure(_))) {
            return Some(name.to_string());
        }
        if let Some(upstream) = definition.step(name) {
            stack.extend(upstream.dependency_names());
        }
    }
    None
}
