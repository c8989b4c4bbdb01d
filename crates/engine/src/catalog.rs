//! Registered workflow definitions, keyed by namespace and name.

use std::collections::HashMap;
use std::sync::Arc;

use handlers::HandlerRegistry;
use tracing::info;

use crate::dag::validate_dag;
use crate::definitions::reference_definitions;
use crate::models::WorkflowDefinition;
use crate::DefinitionError;

#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    definitions: HashMap<(String, String), Arc<WorkflowDefinition>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five reference workflows, checked against `registry`.
    pub fn with_reference_workflows(registry: &HandlerRegistry) -> Result<Self, DefinitionError> {
        let mut catalog = Self::new();
        for definition in reference_definitions()? {
            catalog.register(definition, registry)?;
        }
        Ok(catalog)
    }

    /// Validate `definition` and make it available for task creation.
    ///
    /// Every step's handler must be present in `registry`.
    pub fn register(
        &mut self,
        definition: WorkflowDefinition,
        registry: &HandlerRegistry,
    ) -> Result<(), DefinitionError> {
        validate_dag(&definition)?;

        if let Some(step) = definition.steps.iter().find(|s| !registry.contains(&s.handler)) {
            return Err(DefinitionError::MissingHandler {
                step: step.name.clone(),
                handler: step.handler.clone(),
            });
        }

        let key = (definition.namespace.clone(), definition.name.clone());
        if self.definitions.contains_key(&key) {
            return Err(DefinitionError::DuplicateWorkflow {
                namespace: key.0,
                name: key.1,
            });
        }

        info!(
            "registered workflow {} v{} ({} steps)",
            definition.qualified_name(),
            definition.version,
            definition.steps.len()
        );
        self.definitions.insert(key, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<WorkflowDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{order_processing, PAYMENTS, PROCESS_REFUND};
    use crate::models::StepDefinition;

    #[test]
    fn reference_catalog_registers_all_workflows() {
        let registry = HandlerRegistry::with_reference_handlers();
        let catalog = WorkflowCatalog::with_reference_workflows(&registry).unwrap();
        assert_eq!(catalog.len(), 5);
        assert!(catalog.get(PAYMENTS, PROCESS_REFUND).is_some());
    }

    #[test]
    fn unregistered_handler_is_rejected() {
        let definition = WorkflowDefinition::builder("demo", "orphan")
            .step(StepDefinition::new("only", "does_not_exist"))
            .build()
            .unwrap();
        let err = WorkflowCatalog::new()
            .register(definition, &HandlerRegistry::new())
            .unwrap_err();
        assert!(matches!(err, DefinitionError::MissingHandler { handler, .. } if handler == "does_not_exist"));
    }

    #[test]
    fn duplicate_workflow_is_rejected() {
        let registry = HandlerRegistry::with_reference_handlers();
        let mut catalog = WorkflowCatalog::new();
        catalog.register(order_processing().unwrap(), &registry).unwrap();
        assert!(matches!(
            catalog.register(order_processing().unwrap(), &registry),
            Err(DefinitionError::DuplicateWorkflow { .. })
        ));
    }
}
