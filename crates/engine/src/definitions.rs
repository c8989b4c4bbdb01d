//! The reference workflows.
//!
//! Step names are unqualified; handler names carry the namespace prefix used
//! by [`HandlerRegistry::with_reference_handlers`](handlers::HandlerRegistry::with_reference_handlers).

use crate::models::{StepDefinition, WorkflowDefinition};
use crate::DefinitionError;

pub const ECOMMERCE: &str = "ecommerce";
pub const DATA_PIPELINE: &str = "data_pipeline";
pub const MICROSERVICES: &str = "microservices";
pub const CUSTOMER_SUCCESS: &str = "customer_success";
pub const PAYMENTS: &str = "payments";

pub const ORDER_PROCESSING: &str = "ecommerce_order_processing";
pub const ANALYTICS_PIPELINE: &str = "analytics_pipeline";
pub const USER_REGISTRATION: &str = "user_registration";
pub const PROCESS_REFUND: &str = "process_refund";

/// Linear: `validate_cart` fans out to payment and inventory, which converge
/// at `create_order`.
pub fn order_processing() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(ECOMMERCE, ORDER_PROCESSING)
        .description("Validate a cart, charge it, reserve stock and confirm the order")
        .step(
            StepDefinition::new("validate_cart", "ecommerce_validate_cart")
                .reads(["customer_email", "cart_items"]),
        )
        .step(
            StepDefinition::new("process_payment", "ecommerce_process_payment")
                .reads(["payment_token"])
                .depends_on("validate_cart", "cart"),
        )
        .step(
            StepDefinition::new("update_inventory", "ecommerce_update_inventory")
                .depends_on("validate_cart", "cart"),
        )
        .step(
            StepDefinition::new("create_order", "ecommerce_create_order")
                .reads(["customer_email", "shipping_address"])
                .depends_on("validate_cart", "cart")
                .depends_on("process_payment", "payment")
                .depends_on("update_inventory", "inventory"),
        )
        .step(
            StepDefinition::new("send_confirmation", "ecommerce_send_confirmation")
                .depends_on("create_order", "order"),
        )
        .build()
}

/// Parallel: three independent extract → transform branches converging at
/// `aggregate_metrics`.
pub fn analytics_pipeline() -> Result<WorkflowDefinition, DefinitionError> {
    let range = ["source", "date_range_start", "date_range_end", "granularity"];
    WorkflowDefinition::builder(DATA_PIPELINE, ANALYTICS_PIPELINE)
        .description("Extract, transform and aggregate sales, inventory and customer data")
        .step(StepDefinition::new("extract_sales", "data_pipeline_extract_sales").reads(range))
        .step(StepDefinition::new("extract_inventory", "data_pipeline_extract_inventory").reads(range))
        .step(StepDefinition::new("extract_customers", "data_pipeline_extract_customers").reads(range))
        .step(
            StepDefinition::new("transform_sales", "data_pipeline_transform_sales")
                .depends_on("extract_sales", "sales_data"),
        )
        .step(
            StepDefinition::new("transform_inventory", "data_pipeline_transform_inventory")
                .depends_on("extract_inventory", "inventory_data"),
        )
        .step(
            StepDefinition::new("transform_customers", "data_pipeline_transform_customers")
                .depends_on("extract_customers", "customer_data"),
        )
        .step(
            StepDefinition::new("aggregate_metrics", "data_pipeline_aggregate_metrics")
                .depends_on("transform_sales", "sales")
                .depends_on("transform_inventory", "inventory")
                .depends_on("transform_customers", "customers"),
        )
        .step(
            StepDefinition::new("generate_insights", "data_pipeline_generate_insights")
                .depends_on("aggregate_metrics", "metrics"),
        )
        .build()
}

/// Diamond: account creation fans out to billing and preferences, which
/// converge at the welcome sequence.
pub fn user_registration() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(MICROSERVICES, USER_REGISTRATION)
        .description("Register a user across account, billing, preference and notification services")
        .step(
            StepDefinition::new("create_user_account", "microservices_create_user_account")
                .reads(["email", "full_name", "plan", "source", "phone"]),
        )
        .step(
            StepDefinition::new("setup_billing_profile", "microservices_setup_billing_profile")
                .depends_on("create_user_account", "user"),
        )
        .step(
            StepDefinition::new("initialize_preferences", "microservices_initialize_preferences")
                .reads(["preferences"])
                .depends_on("create_user_account", "user"),
        )
        .step(
            StepDefinition::new("send_welcome_sequence", "microservices_send_welcome_sequence")
                .depends_on("create_user_account", "user")
                .depends_on("setup_billing_profile", "billing")
                .depends_on("initialize_preferences", "preferences"),
        )
        .step(
            StepDefinition::new("update_user_status", "microservices_update_user_status")
                .depends_on("create_user_account", "user")
                .depends_on("setup_billing_profile", "billing")
                .depends_on("initialize_preferences", "preferences")
                .depends_on("send_welcome_sequence", "welcome"),
        )
        .build()
}

/// Customer-success half of the dual-namespace refund.
pub fn customer_success_refund() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(CUSTOMER_SUCCESS, PROCESS_REFUND)
        .description("Validate, approve and delegate a customer refund request")
        .step(
            StepDefinition::new("validate_refund_request", "customer_success_validate_refund_request")
                .reads(["ticket_id", "customer_id", "refund_amount", "customer_email", "refund_reason"]),
        )
        .step(
            StepDefinition::new("check_refund_policy", "customer_success_check_refund_policy")
                .depends_on("validate_refund_request", "validation"),
        )
        .step(
            StepDefinition::new("get_manager_approval", "customer_success_get_manager_approval")
                .depends_on("check_refund_policy", "policy")
                .depends_on("validate_refund_request", "validation"),
        )
        .step(
            StepDefinition::new("execute_refund_workflow", "customer_success_execute_refund_workflow")
                .depends_on("get_manager_approval", "approval")
                .depends_on("validate_refund_request", "validation"),
        )
        .step(
            StepDefinition::new("update_ticket_status", "customer_success_update_ticket_status")
                .depends_on("execute_refund_workflow", "execution")
                .depends_on("validate_refund_request", "validation"),
        )
        .build()
}

/// Payments half of the dual-namespace refund.
pub fn payments_refund() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(PAYMENTS, PROCESS_REFUND)
        .description("Refund a payment through the gateway and notify the customer")
        .step(
            StepDefinition::new("validate_payment_eligibility", "payments_validate_payment_eligibility")
                .reads(["payment_id", "refund_amount", "customer_email", "payment_method", "order_id"]),
        )
        .step(
            StepDefinition::new("process_gateway_refund", "payments_process_gateway_refund")
                .depends_on("validate_payment_eligibility", "eligibility"),
        )
        .step(
            StepDefinition::new("update_payment_records", "payments_update_payment_records")
                .depends_on("process_gateway_refund", "gateway")
                .depends_on("validate_payment_eligibility", "eligibility"),
        )
        .step(
            StepDefinition::new("notify_customer", "payments_notify_customer")
                .depends_on("process_gateway_refund", "gateway")
                .depends_on("validate_payment_eligibility", "eligibility")
                .depends_on("update_payment_records", "records"),
        )
        .build()
}

/// All five reference workflows.
pub fn reference_definitions() -> Result<Vec<WorkflowDefinition>, DefinitionError> {
    Ok(vec![
        order_processing()?,
        analytics_pipeline()?,
        user_registration()?,
        customer_success_refund()?,
        payments_refund()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::validate_dag;

    #[test]
    fn every_reference_definition_is_acyclic() {
        let definitions = reference_definitions().expect("reference definitions are valid");
        let sizes: Vec<usize> = definitions.iter().map(|d| d.steps.len()).collect();
        assert_eq!(sizes, vec![5, 8, 5, 5, 4]);
        for definition in &definitions {
            assert!(validate_dag(definition).is_ok(), "{}", definition.qualified_name());
        }
    }

    #[test]
    fn pipeline_converges_at_aggregate() {
        let definition = analytics_pipeline().unwrap();
        let sorted = validate_dag(&definition).unwrap();
        let pos = |name: &str| sorted.iter().position(|s| s == name).unwrap();
        for transform in ["transform_sales", "transform_inventory", "transform_customers"] {
            assert!(pos(transform) < pos("aggregate_metrics"));
        }
        assert_eq!(sorted.last().map(String::as_str), Some("generate_insights"));
    }

    #[test]
    fn refund_namespaces_share_no_edge() {
        let cs = customer_success_refund().unwrap();
        let payments = payments_refund().unwrap();
        for step in &payments.steps {
            assert!(step.dependency_names().all(|d| cs.step(d).is_none()));
        }
        assert_eq!(cs.name, payments.name);
        assert_ne!(cs.namespace, payments.namespace);
    }
}
