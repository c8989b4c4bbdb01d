//! Name → handler lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::StepHandler;
use crate::{customer_success, data_pipeline, ecommerce, microservices, payments};

/// Handlers keyed by the name they report from [`StepHandler::name`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reference handler of the five shipped workflows.
    pub fn with_reference_handlers() -> Self {
        let mut registry = Self::new();

        registry.register(ecommerce::ValidateCart);
        registry.register(ecommerce::ProcessPayment);
        registry.register(ecommerce::UpdateInventory);
        registry.register(ecommerce::CreateOrder);
        registry.register(ecommerce::SendConfirmation);

        registry.register(data_pipeline::ExtractSales::default());
        registry.register(data_pipeline::ExtractInventory);
        registry.register(data_pipeline::ExtractCustomers);
        registry.register(data_pipeline::TransformSales);
        registry.register(data_pipeline::TransformInventory);
        registry.register(data_pipeline::TransformCustomers);
        registry.register(data_pipeline::AggregateMetrics);
        registry.register(data_pipeline::GenerateInsights);

        registry.register(microservices::CreateUserAccount);
        registry.register(microservices::SetupBillingProfile);
        registry.register(microservices::InitializePreferences);
        registry.register(microservices::SendWelcomeSequence);
        registry.register(microservices::UpdateUserStatus);

        registry.register(customer_success::ValidateRefundRequest);
        registry.register(customer_success::CheckRefundPolicy);
        registry.register(customer_success::GetManagerApproval);
        registry.register(customer_success::ExecuteRefundWorkflow);
        registry.register(customer_success::UpdateTicketStatus);

        registry.register(payments::ValidatePaymentEligibility);
        registry.register(payments::ProcessGatewayRefund);
        registry.register(payments::UpdatePaymentRecords);
        registry.register(payments::NotifyCustomer);

        registry
    }

    /// Register `handler` under its own name, replacing any previous entry.
    pub fn register(&mut self, handler: impl StepHandler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}
