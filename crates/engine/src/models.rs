//! Workflow definitions.
//!
//! A definition is the static DAG of one workflow: which steps exist, which
//! handler each step runs, and which upstream results it receives under
//! which alias. Definitions serialize to the JSON accepted by
//! `flowbridge validate`.

use serde::{Deserialize, Serialize};

use crate::dag::validate_dag;
use crate::DefinitionError;

// ---------------------------------------------------------------------------
// DependencyDecl
// ---------------------------------------------------------------------------

/// One upstream step, and the name its result is handed over as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    pub step: String,
    pub alias: String,
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within the workflow.
    pub name: String,
    /// Registry name of the handler to run.
    pub handler: String,
    /// Task-level context fields this step reads. Informational.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<DependencyDecl>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            inputs: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Receive the result of `step` under `alias`.
    pub fn depends_on(mut self, step: impl Into<String>, alias: impl Into<String>) -> Self {
        self.depends_on.push(DependencyDecl {
            step: step.into(),
            alias: alias.into(),
        });
        self
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(|d| d.step.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn builder(namespace: impl Into<String>, name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            definition: WorkflowDefinition {
                namespace: namespace.into(),
                name: name.into(),
                version: "1.0.0".into(),
                description: None,
                steps: Vec::new(),
            },
        }
    }

    /// Parse and validate a JSON definition.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let definition: WorkflowDefinition =
            serde_json::from_str(json).map_err(|e| DefinitionError::Malformed(e.to_string()))?;
        validate_dag(&definition)?;
        Ok(definition)
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Steps that declare `name` as a direct dependency.
    pub fn dependents_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a StepDefinition> {
        self.steps
            .iter()
            .filter(move |s| s.dependency_names().any(|d| d == name))
    }

    /// `namespace/name`, for logs.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Builds a definition and validates it on `build`.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    definition: WorkflowDefinition,
}

impl WorkflowBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.definition.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.definition.steps.push(step);
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        validate_dag(&self.definition)?;
        Ok(self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_validates() {
        let json = r#"{
            "namespace": "demo",
            "name": "two_steps",
            "version": "0.1.0",
            "steps": [
                { "name": "a", "handler": "h_a" },
                { "name": "b", "handler": "h_b",
                  "depends_on": [{ "step": "a", "alias": "first" }] }
            ]
        }"#;
        let definition = WorkflowDefinition::from_json(json).expect("valid definition");
        assert_eq!(definition.step("b").map(|s| s.depends_on.len()), Some(1));
        assert_eq!(definition.dependents_of("a").count(), 1);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            WorkflowDefinition::from_json("{ \"namespace\": 1 }"),
            Err(DefinitionError::Malformed(_))
        ));
    }

    #[test]
    fn builder_rejects_unknown_dependency() {
        let err = WorkflowDefinition::builder("demo", "broken")
            .step(StepDefinition::new("b", "h").depends_on("ghost", "g"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownDependency {
                step: "b".into(),
                dependency: "ghost".into()
            }
        );
    }
}
