//! `handlers` crate: the step handler contract and the reference handlers.
//!
//! Every step a workflow declares is executed through [`StepHandler`]. The
//! engine crate looks handlers up by name in a [`HandlerRegistry`].

pub mod error;
pub mod ids;
pub mod mock;
pub mod money;
pub mod registry;
pub mod traits;

pub mod customer_success;
pub mod data_pipeline;
pub mod ecommerce;
pub mod microservices;
pub mod payments;

pub use error::StepError;
pub use money::Money;
pub use registry::HandlerRegistry;
pub use traits::{Dependencies, StepContext, StepHandler, StepInput, StepResult, TaskInputs};
