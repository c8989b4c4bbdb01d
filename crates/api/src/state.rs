//! Shared application state handed to every route.

use std::sync::Arc;

use client::OrchestrationClient;
use db::DomainStore;
use engine::Delegator;

/// Settings the routes apply to every task they submit.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Version requested for every reference workflow.
    pub workflow_version: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            workflow_version: "1.0.0".into(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DomainStore>,
    pub delegator: Delegator,
    pub settings: ApiSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DomainStore>,
        client: Arc<dyn OrchestrationClient>,
        settings: ApiSettings,
    ) -> Self {
        Self {
            store,
            delegator: Delegator::new(client),
            settings,
        }
    }
}
