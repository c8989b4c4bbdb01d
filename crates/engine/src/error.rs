//! Engine-level error types.

use thiserror::Error;

use client::BoundaryError;

/// A workflow definition that must not be registered.
///
/// Raised when a definition is built or added to a catalog, never while a
/// task is running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow '{0}' declares no steps")]
    NoSteps(String),

    /// Two or more steps share the same name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    /// A step depends on a name that is not a step of the same workflow.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// A step declares the same alias twice.
    #[error("step '{step}' declares alias '{alias}' more than once")]
    DuplicateAlias { step: String, alias: String },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("step '{step}' uses unregistered handler '{handler}'")]
    MissingHandler { step: String, handler: String },

    #[error("workflow {namespace}/{name} is already registered")]
    DuplicateWorkflow { namespace: String, name: String },

    #[error("malformed workflow definition: {0}")]
    Malformed(String),
}

/// Raised by the resolver instead of handing a step an incomplete map.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("step '{0}' is not part of this workflow")]
    UnknownStep(String),

    /// An upstream step failed permanently, so this step can never run.
    #[error("step '{step}' is unreachable: upstream '{failed_upstream}' failed permanently")]
    DependencyUnresolved {
        step: String,
        failed_upstream: String,
    },
}

/// Step worker lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// `start` was called on a worker that is already running.
    #[error("step worker already started")]
    AlreadyStarted,

    #[error("no handler registered as '{0}'")]
    UnknownHandler(String),

    /// The dispatch loop is gone; no further steps can be executed.
    #[error("step worker channel closed")]
    ChannelClosed,
}

/// Errors surfaced by the local engine's own API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),
}
