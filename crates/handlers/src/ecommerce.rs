//! E-commerce order processing.
//!
//! `validate_cart` fans out to `process_payment` and `update_inventory`,
//! which converge at `create_order`; `send_confirmation` closes the chain.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::codes;
use crate::ids;
use crate::money::Money;
use crate::traits::{Dependencies, StepContext, StepHandler, StepInput, StepResult, TaskInputs};
use crate::StepError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// 8.75%, in basis points.
pub const TAX_RATE_BP: i64 = 875;
pub const FREE_SHIPPING_THRESHOLD: Money = Money::from_cents(7_500);
pub const STANDARD_SHIPPING: Money = Money::from_cents(999);
/// Per-line bounds on cart input.
pub const MAX_UNIT_PRICE: Money = Money::from_cents(100_000_000);
pub const MAX_QUANTITY: i64 = 10_000;

const DEFAULT_TOKEN: &str = "tok_test_success";
const DECLINED_TOKENS: [&str; 2] = ["tok_test_declined", "tok_test_insufficient_funds"];
const GATEWAY_ERROR_TOKENS: [&str; 2] = ["tok_test_gateway_error", "tok_test_timeout"];

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
}

/// Task context for the order workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInput {
    pub customer_email: String,
    pub cart_items: Vec<CartItem>,
    #[serde(default)]
    pub payment_token: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<String>,
}

impl StepInput for OrderInput {
    fn validate(&self) -> Result<(), StepError> {
        if !self.customer_email.contains('@') {
            return Err(StepError::invalid_input(format!(
                "invalid customer_email: {}",
                self.customer_email
            )));
        }
        if self.cart_items.is_empty() {
            return Err(StepError::invalid_input("cart is empty"));
        }
        for (idx, item) in self.cart_items.iter().enumerate() {
            if item.sku.trim().is_empty() || item.name.trim().is_empty() {
                return Err(StepError::invalid_input(format!(
                    "item at index {idx} missing sku or name"
                )));
            }
            if !(1..=MAX_QUANTITY).contains(&item.quantity) {
                return Err(StepError::invalid_input(format!(
                    "item '{}' has invalid quantity: {}",
                    item.sku, item.quantity
                )));
            }
            if !item.unit_price.is_positive() || item.unit_price > MAX_UNIT_PRICE {
                return Err(StepError::invalid_input(format!(
                    "item '{}' has invalid price: {}",
                    item.sku, item.unit_price
                )));
            }
        }
        Ok(())
    }
}

/// Fields later steps need; the cart itself was validated upstream.
#[derive(Debug, Clone, Deserialize)]
struct CustomerInput {
    customer_email: String,
    #[serde(default)]
    payment_token: Option<String>,
}

impl StepInput for CustomerInput {}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedItem {
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateCartResult {
    pub validated_items: Vec<ValidatedItem>,
    pub item_count: usize,
    pub subtotal: Money,
    pub tax: Money,
    pub tax_rate: f64,
    pub shipping: Money,
    pub total: Money,
    pub validated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentResult {
    pub payment_id: String,
    pub transaction_id: String,
    pub authorization_code: String,
    pub amount_charged: Money,
    pub currency: String,
    pub payment_method_type: String,
    pub gateway_response: String,
    pub status: String,
    pub processed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub product_id: String,
    pub name: String,
    pub quantity_reserved: i64,
    pub reservation_id: String,
    pub warehouse: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInventoryResult {
    pub updated_products: Vec<Reservation>,
    pub total_items_reserved: i64,
    pub inventory_log_id: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResult {
    pub order_id: String,
    pub order_number: String,
    pub customer_email: String,
    pub items: Vec<ValidatedItem>,
    pub item_count: usize,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
    pub payment_id: String,
    pub transaction_id: String,
    pub authorization_code: String,
    pub inventory_log_id: String,
    pub status: String,
    pub created_at: String,
    pub estimated_delivery: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfirmationResult {
    pub email_sent: bool,
    pub recipient: String,
    pub email_type: String,
    pub message_id: String,
    pub subject: String,
    pub body_preview: String,
    pub channel: String,
    pub template: String,
    pub status: String,
    pub sent_at: String,
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Line totals, subtotal, tax, shipping and total for a cart.
pub fn price_cart(items: &[CartItem]) -> ValidateCartResult {
    let validated_items: Vec<ValidatedItem> = items
        .iter()
        .map(|item| ValidatedItem {
            sku: item.sku.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.unit_price.times(item.quantity),
        })
        .collect();

    let subtotal: Money = validated_items.iter().map(|i| i.line_total).sum();
    let tax = subtotal.apply_rate(TAX_RATE_BP);
    let shipping = if subtotal >= FREE_SHIPPING_THRESHOLD {
        Money::ZERO
    } else {
        STANDARD_SHIPPING
    };

    ValidateCartResult {
        item_count: validated_items.len(),
        validated_items,
        subtotal,
        tax,
        tax_rate: TAX_RATE_BP as f64 / 10_000.0,
        shipping,
        total: subtotal + tax + shipping,
        validated_at: Utc::now().to_rfc3339(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct ValidateCart;

impl StepHandler for ValidateCart {
    fn name(&self) -> &str {
        "ecommerce_validate_cart"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        _deps: &Dependencies,
        _ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: OrderInput = inputs.parse()?;
        let cart = price_cart(&input.cart_items);

        info!(
            "cart validated: {} items, subtotal={}, tax={}, shipping={}, total={}",
            cart.item_count, cart.subtotal, cart.tax, cart.shipping, cart.total
        );
        StepResult::from_typed(&cart)
    }
}

pub struct ProcessPayment;

impl StepHandler for ProcessPayment {
    fn name(&self) -> &str {
        "ecommerce_process_payment"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: CustomerInput = inputs.parse()?;
        let cart: ValidateCartResult = deps.get("cart")?;
        let token = input.payment_token.as_deref().unwrap_or(DEFAULT_TOKEN);

        if DECLINED_TOKENS.contains(&token) {
            return Err(StepError::permanent(
                format!("payment declined for token {token}"),
                codes::PAYMENT_DECLINED,
            ));
        }
        if GATEWAY_ERROR_TOKENS.contains(&token) {
            return Err(StepError::retryable(
                "payment gateway returned an error, will retry",
            ));
        }

        let transaction_id = ids::prefixed("txn", ctx.rng(), 16);
        let digest = Sha256::digest(format!("{token}:{}:{transaction_id}", cart.total.cents()));
        let authorization_code = hex::encode(digest)[..12].to_uppercase();

        info!("payment authorized: {} (txn {})", cart.total, transaction_id);

        StepResult::from_typed(&ProcessPaymentResult {
            payment_id: ids::prefixed("pay", ctx.rng(), 12),
            transaction_id,
            authorization_code,
            amount_charged: cart.total,
            currency: "USD".into(),
            payment_method_type: "card".into(),
            gateway_response: "approved".into(),
            status: "completed".into(),
            processed_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct UpdateInventory;

impl StepHandler for UpdateInventory {
    fn name(&self) -> &str {
        "ecommerce_update_inventory"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let cart: ValidateCartResult = deps.get("cart")?;

        let updated_products: Vec<Reservation> = cart
            .validated_items
            .iter()
            .map(|item| Reservation {
                product_id: item.sku.clone(),
                name: item.name.clone(),
                quantity_reserved: item.quantity,
                reservation_id: ids::prefixed("res", ctx.rng(), 12),
                warehouse: "WH-EAST-01".into(),
                status: "reserved".into(),
            })
            .collect();
        let total_items_reserved = updated_products.iter().map(|r| r.quantity_reserved).sum();

        info!(
            "inventory reserved: {} units across {} products",
            total_items_reserved,
            updated_products.len()
        );

        StepResult::from_typed(&UpdateInventoryResult {
            updated_products,
            total_items_reserved,
            inventory_log_id: ids::prefixed("log", ctx.rng(), 8),
            updated_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct CreateOrder;

impl StepHandler for CreateOrder {
    fn name(&self) -> &str {
        "ecommerce_create_order"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: CustomerInput = inputs.parse()?;
        let cart: ValidateCartResult = deps.get("cart")?;
        let payment: ProcessPaymentResult = deps.get("payment")?;
        let inventory: UpdateInventoryResult = deps.get("inventory")?;

        let now = Utc::now();
        let order_id = format!("ORD-{}", ids::hex_token(ctx.rng(), 8).to_uppercase());
        let order_number = format!(
            "ORD-{}-{}",
            now.format("%Y%m%d"),
            ids::hex_token(ctx.rng(), 8).to_uppercase()
        );

        info!("order {} created for {} ({})", order_id, input.customer_email, cart.total);

        StepResult::from_typed(&CreateOrderResult {
            order_id,
            order_number,
            customer_email: input.customer_email,
            item_count: cart.item_count,
            items: cart.validated_items,
            subtotal: cart.subtotal,
            tax: cart.tax,
            shipping: cart.shipping,
            total: cart.total,
            payment_id: payment.payment_id,
            transaction_id: payment.transaction_id,
            authorization_code: payment.authorization_code,
            inventory_log_id: inventory.inventory_log_id,
            status: "confirmed".into(),
            created_at: now.to_rfc3339(),
            estimated_delivery: (now + Duration::days(7)).format("%B %d, %Y").to_string(),
        })
    }
}

pub struct SendConfirmation;

impl StepHandler for SendConfirmation {
    fn name(&self) -> &str {
        "ecommerce_send_confirmation"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: CustomerInput = inputs.parse()?;
        let order: CreateOrderResult = deps.get("order")?;

        let subject = format!("Order Confirmation - {}", order.order_id);
        let body_preview = format!(
            "Thank you for your order! Your order {} containing {} item(s) totalling {} has been confirmed.",
            order.order_id, order.item_count, order.total
        );

        info!("confirmation for {} sent to {}", order.order_id, input.customer_email);

        StepResult::from_typed(&SendConfirmationResult {
            email_sent: true,
            recipient: input.customer_email,
            email_type: "order_confirmation".into(),
            message_id: ids::prefixed("msg", ctx.rng(), 16),
            subject,
            body_preview,
            channel: "email".into(),
            template: "order_confirmation_v2".into(),
            status: "sent".into(),
            sent_at: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(step: &str) -> StepContext {
        StepContext::seeded(Uuid::new_v4(), step, 1, 42)
    }

    fn order_context(token: &str) -> TaskInputs {
        TaskInputs::new(json!({
            "customer_email": "buyer@example.com",
            "payment_token": token,
            "cart_items": [
                { "sku": "WID-A", "name": "Widget A", "quantity": 2, "unit_price": 29.99 },
                { "sku": "WID-B", "name": "Widget B", "quantity": 1, "unit_price": 49.99 }
            ]
        }))
    }

    fn validated_cart(inputs: &TaskInputs) -> Dependencies {
        let cart = ValidateCart
            .execute(inputs, &Dependencies::new(), &mut ctx("validate_cart"))
            .expect("cart should validate");
        [("cart".to_string(), cart)].into_iter().collect()
    }

    #[test]
    fn cart_pricing_rounds_at_each_step() {
        let result = ValidateCart
            .execute(&order_context(DEFAULT_TOKEN), &Dependencies::new(), &mut ctx("validate_cart"))
            .unwrap();

        assert_eq!(result.get("subtotal"), Some(&json!(109.97)));
        assert_eq!(result.get("tax"), Some(&json!(9.62)));
        assert_eq!(result.get("shipping"), Some(&json!(0.0)));
        assert_eq!(result.get("total"), Some(&json!(119.59)));
        assert_eq!(result.get("item_count"), Some(&json!(2)));
    }

    #[test]
    fn small_cart_pays_standard_shipping() {
        let cart = price_cart(&[CartItem {
            sku: "S".into(),
            name: "Sticker".into(),
            quantity: 1,
            unit_price: Money::from_cents(500),
        }]);
        assert_eq!(cart.shipping, STANDARD_SHIPPING);
        // 500 + 44 (8.75% of 5.00 = 43.75) + 999
        assert_eq!(cart.total, Money::from_cents(1543));
    }

    #[test]
    fn empty_cart_is_permanent() {
        let inputs = TaskInputs::new(json!({ "customer_email": "a@b.test", "cart_items": [] }));
        let err = ValidateCart
            .execute(&inputs, &Dependencies::new(), &mut ctx("validate_cart"))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_INPUT));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let inputs = TaskInputs::new(json!({
            "customer_email": "a@b.test",
            "cart_items": [{ "sku": "X", "name": "X", "quantity": 0, "unit_price": 1.0 }]
        }));
        let err = ValidateCart
            .execute(&inputs, &Dependencies::new(), &mut ctx("validate_cart"))
            .unwrap_err();
        assert!(err.message().contains("invalid quantity"));
    }

    #[test]
    fn declined_token_is_permanent_and_gateway_error_is_retryable() {
        let declined = order_context("tok_test_declined");
        let err = ProcessPayment
            .execute(&declined, &validated_cart(&declined), &mut ctx("process_payment"))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::PAYMENT_DECLINED));

        let flaky = order_context("tok_test_timeout");
        let err = ProcessPayment
            .execute(&flaky, &validated_cart(&flaky), &mut ctx("process_payment"))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn payment_without_cart_is_missing_dependency() {
        let err = ProcessPayment
            .execute(&order_context(DEFAULT_TOKEN), &Dependencies::new(), &mut ctx("process_payment"))
            .unwrap_err();
        assert_eq!(err.message(), "missing dependency: cart");
    }

    #[test]
    fn full_chain_produces_confirmed_order() {
        let inputs = order_context(DEFAULT_TOKEN);
        let mut deps = validated_cart(&inputs);

        let payment = ProcessPayment.execute(&inputs, &deps, &mut ctx("process_payment")).unwrap();
        let inventory = UpdateInventory.execute(&inputs, &deps, &mut ctx("update_inventory")).unwrap();
        assert_eq!(inventory.get("total_items_reserved"), Some(&json!(3)));

        deps.insert("payment", payment);
        deps.insert("inventory", inventory);
        let order = CreateOrder.execute(&inputs, &deps, &mut ctx("create_order")).unwrap();
        assert_eq!(order.get("status"), Some(&json!("confirmed")));
        assert_eq!(order.get("total"), Some(&json!(119.59)));

        let deps: Dependencies = [("order".to_string(), order)].into_iter().collect();
        let sent = SendConfirmation.execute(&inputs, &deps, &mut ctx("send_confirmation")).unwrap();
        assert_eq!(sent.get("recipient"), Some(&json!("buyer@example.com")));
        assert_eq!(sent.get("status"), Some(&json!("sent")));
    }

    #[test]
    fn absurd_price_or_quantity_is_invalid_input() {
        for (quantity, unit_price) in [(1, 1e17), (1_000_000, 1.0)] {
            let inputs = TaskInputs::new(json!({
                "customer_email": "a@b.test",
                "cart_items": [
                    { "sku": "X", "name": "X", "quantity": quantity, "unit_price": unit_price },
                    { "sku": "Y", "name": "Y", "quantity": quantity, "unit_price": unit_price }
                ]
            }));
            let err = ValidateCart
                .execute(&inputs, &Dependencies::new(), &mut ctx("validate_cart"))
                .unwrap_err();
            assert_eq!(err.code(), Some(codes::INVALID_INPUT));
        }
    }
}
