//! DAG validation. Run this before a definition is registered.
//!
//! Rules enforced:
//! 1. Step names must be unique within the workflow.
//! 2. Every dependency must name another step of the same workflow.
//! 3. Aliases must be unique per step.
//! 4. The directed graph must be acyclic (topological sort must succeed).
//!
//! Returns the step names in a topological order on success. Siblings keep
//! their declaration order, but nothing may rely on that.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::WorkflowDefinition;
use crate::DefinitionError;

/// Validate the workflow's DAG and return its steps in topological order.
///
/// # Errors
/// - [`DefinitionError::NoSteps`] for an empty workflow.
/// - [`DefinitionError::DuplicateStep`] if two steps share a name.
/// - [`DefinitionError::UnknownDependency`] for a dependency on a missing step
///   (a step depending on itself is reported as a cycle).
/// - [`DefinitionError::DuplicateAlias`] if a step reuses an alias.
/// - [`DefinitionError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<Vec<String>, DefinitionError> {
    if workflow.steps.is_empty() {
        return Err(DefinitionError::NoSteps(workflow.qualified_name()));
    }

    // -----------------------------------------------------------------------
    // 1. Ensure step names are unique
    // -----------------------------------------------------------------------
    let mut step_set: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !step_set.insert(step.name.as_str()) {
            return Err(DefinitionError::DuplicateStep(step.name.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. + 3. Validate dependency targets and aliases
    // -----------------------------------------------------------------------
    for step in &workflow.steps {
        let mut aliases: HashSet<&str> = HashSet::new();
        for dep in &step.depends_on {
            if dep.step == step.name {
                return Err(DefinitionError::CycleDetected);
            }
            if !step_set.contains(dep.step.as_str()) {
                return Err(DefinitionError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.step.clone(),
                });
            }
            if !aliases.insert(dep.alias.as_str()) {
                return Err(DefinitionError::DuplicateAlias {
                    step: step.name.clone(),
                    alias: dep.alias.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for step in &workflow.steps {
        dependents.entry(step.name.as_str()).or_default();
        in_degree.insert(step.name.as_str(), 0);
    }

    for step in &workflow.steps {
        // Two aliases for the same upstream still count as one edge.
        let upstream: HashSet<&str> = step.dependency_names().collect();
        for dep in upstream {
            dependents.entry(dep).or_default().push(step.name.as_str());
            *in_degree.entry(step.name.as_str()).or_insert(0) += 1;
        }
    }

    // Seed the queue with steps that have no dependencies, in declaration order.
    let mut queue: VecDeque<&str> = workflow
        .steps
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| in_degree.get(name) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.steps.len());

    while let Some(name) = queue.pop_front() {
        sorted.push(name.to_owned());

        if let Some(children) = dependents.get(name) {
            for &child in children {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    // If we didn't visit every step the graph contains a cycle.
    if sorted.len() != workflow.steps.len() {
        return Err(DefinitionError::CycleDetected);
    }

    Ok(sorted)
}
