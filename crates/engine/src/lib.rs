//! `engine` crate: workflow definitions, DAG validation, dependency
//! resolution, the step worker, the local orchestration engine and
//! cross-namespace delegation.

pub mod catalog;
pub mod dag;
pub mod definitions;
pub mod delegation;
pub mod error;
pub mod local;
pub mod models;
pub mod resolver;
pub mod worker;

pub use catalog::WorkflowCatalog;
pub use dag::validate_dag;
pub use delegation::{DelegationOutcome, DelegationTarget, Delegator, NamespaceStatus};
pub use error::{DefinitionError, EngineError, ResolveError, WorkerError};
pub use local::{LocalEngine, LocalEngineConfig};
pub use models::{DependencyDecl, StepDefinition, WorkflowDefinition};
pub use resolver::{Resolution, StepOutcome};
pub use worker::{StepWorker, WorkerHandle};
