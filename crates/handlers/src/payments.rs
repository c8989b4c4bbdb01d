//! Payments side of the refund flow.
//!
//! Eligibility, gateway refund, ledger update and customer notification,
//! strictly sequential.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::codes;
use crate::ids;
use crate::money::Money;
use crate::traits::{Dependencies, StepContext, StepHandler, StepInput, StepResult, TaskInputs};
use crate::StepError;

/// Gateway fee in basis points (0.3%).
pub const GATEWAY_FEE_BP: i64 = 30;

/// Largest refund a gift card can take back automatically.
const GIFT_CARD_LIMIT: Money = Money::from_cents(50_000);

/// Simulated headroom of the original charge over the refund.
const ORIGINAL_CHARGE_MARGIN: Money = Money::from_cents(100_000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    CreditCard,
    DebitCard,
    BankTransfer,
    GiftCard,
    Crypto,
}

impl PaymentMethod {
    fn supports_refund_of(self, amount: Money) -> bool {
        match self {
            PaymentMethod::CreditCard | PaymentMethod::DebitCard | PaymentMethod::BankTransfer => true,
            PaymentMethod::GiftCard => amount <= GIFT_CARD_LIMIT,
            PaymentMethod::Crypto => false,
        }
    }

    /// (business days to settle, gateway)
    fn settlement(self) -> (i64, &'static str) {
        match self {
            PaymentMethod::CreditCard => (5, "stripe"),
            PaymentMethod::DebitCard => (3, "stripe"),
            PaymentMethod::BankTransfer => (7, "ach_processor"),
            PaymentMethod::GiftCard => (1, "internal"),
            PaymentMethod::Crypto => (5, "default_gateway"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRefundInput {
    pub payment_id: String,
    pub refund_amount: Money,
    pub customer_email: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub order_id: Option<String>,
}

impl StepInput for PaymentRefundInput {
    fn validate(&self) -> Result<(), StepError> {
        if self.payment_id.trim().is_empty() {
            return Err(StepError::invalid_input("payment_id must not be blank"));
        }
        if !self.customer_email.contains('@') {
            return Err(StepError::invalid_input(format!(
                "invalid customer_email: {}",
                self.customer_email
            )));
        }
        if !self.refund_amount.is_positive() || self.refund_amount > Money::MAX_AMOUNT {
            return Err(StepError::invalid_input(format!(
                "refund amount out of range: {}",
                self.refund_amount
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub payment_validated: bool,
    pub payment_id: String,
    pub order_id: String,
    pub customer_email: String,
    pub refund_amount: Money,
    pub original_amount: Money,
    pub is_partial_refund: bool,
    pub payment_method: PaymentMethod,
    pub eligibility_status: String,
    pub validated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefundResult {
    pub refund_processed: bool,
    pub refund_id: String,
    pub payment_id: String,
    pub refund_amount: Money,
    pub gateway_fee: Money,
    pub net_refund: Money,
    pub gateway: String,
    pub gateway_transaction_id: String,
    pub payment_method: PaymentMethod,
    pub estimated_business_days: i64,
    pub estimated_arrival: String,
    pub processed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub action: String,
    pub refund_transaction_id: String,
    pub amount: Money,
    pub performed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecordsResult {
    pub records_updated: bool,
    pub payment_id: String,
    pub refund_id: String,
    pub record_id: String,
    pub payment_status: String,
    pub refund_status: String,
    pub original_amount: Money,
    pub refund_amount: Money,
    pub remaining_balance: Money,
    pub is_partial_refund: bool,
    pub history_entries_created: u32,
    pub audit_entry: AuditEntry,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundNotificationResult {
    pub notification_sent: bool,
    pub customer_email: String,
    pub message_id: String,
    pub notification_type: String,
    pub subject: String,
    pub body: String,
    pub delivery_status: String,
    pub refund_id: String,
    pub refund_amount: Money,
    pub estimated_completion_days: i64,
    pub sent_at: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct ValidatePaymentEligibility;

impl StepHandler for ValidatePaymentEligibility {
    fn name(&self) -> &str {
        "payments_validate_payment_eligibility"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        _deps: &Dependencies,
        _ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: PaymentRefundInput = inputs.parse()?;
        let payment_id = &input.payment_id;

        if payment_id.contains("pay_test_insufficient") {
            return Err(StepError::permanent(
                "insufficient funds available for refund",
                codes::BUSINESS_RULE,
            ));
        }
        if payment_id.contains("pay_test_processing") {
            return Err(StepError::retryable("payment is still processing"));
        }
        if payment_id.contains("pay_test_ineligible") {
            return Err(StepError::permanent(
                "payment is not eligible for refund: past refund window",
                codes::BUSINESS_RULE,
            ));
        }
        if !input.payment_method.supports_refund_of(input.refund_amount) {
            return Err(StepError::permanent(
                format!(
                    "payment method {:?} does not support automated refunds of {}",
                    input.payment_method, input.refund_amount
                ),
                codes::BUSINESS_RULE,
            ));
        }

        let original_amount = input.refund_amount + ORIGINAL_CHARGE_MARGIN;

        info!(
            "payment eligibility validated: payment_id={}, amount={}, method={:?}",
            payment_id, input.refund_amount, input.payment_method
        );

        StepResult::from_typed(&EligibilityResult {
            payment_validated: true,
            payment_id: input.payment_id,
            order_id: input.order_id.unwrap_or_else(|| "unknown".into()),
            customer_email: input.customer_email,
            refund_amount: input.refund_amount,
            original_amount,
            is_partial_refund: input.refund_amount < original_amount,
            payment_method: input.payment_method,
            eligibility_status: "eligible".into(),
            validated_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct ProcessGatewayRefund;

impl StepHandler for ProcessGatewayRefund {
    fn name(&self) -> &str {
        "payments_process_gateway_refund"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let eligibility: EligibilityResult = deps.get("eligibility")?;
        let payment_id = &eligibility.payment_id;

        if payment_id.contains("pay_test_gateway_timeout") {
            warn!("gateway timeout for {}", payment_id);
            return Err(StepError::retryable("gateway timeout, will retry"));
        }
        if payment_id.contains("pay_test_gateway_error") {
            return Err(StepError::permanent(
                "gateway refund failed: transaction rejected",
                codes::GATEWAY_REJECTED,
            ));
        }

        let (days, gateway) = eligibility.payment_method.settlement();
        let gateway_fee = eligibility.refund_amount.apply_rate(GATEWAY_FEE_BP);
        let net_refund = eligibility.refund_amount - gateway_fee;
        let now = Utc::now();

        let refund_id = ids::prefixed("rfnd", ctx.rng(), 12);
        info!(
            "gateway refund {} via {}: amount={}, fee={}",
            refund_id, gateway, eligibility.refund_amount, gateway_fee
        );

        StepResult::from_typed(&GatewayRefundResult {
            refund_processed: true,
            refund_id,
            payment_id: eligibility.payment_id,
            refund_amount: eligibility.refund_amount,
            gateway_fee,
            net_refund,
            gateway: gateway.into(),
            gateway_transaction_id: ids::prefixed("gw_txn", ctx.rng(), 16),
            payment_method: eligibility.payment_method,
            estimated_business_days: days,
            estimated_arrival: (now + Duration::days(days)).to_rfc3339(),
            processed_at: now.to_rfc3339(),
        })
    }
}

pub struct UpdatePaymentRecords;

impl StepHandler for UpdatePaymentRecords {
    fn name(&self) -> &str {
        "payments_update_payment_records"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let gateway: GatewayRefundResult = deps.get("gateway")?;
        let eligibility: EligibilityResult = deps.get("eligibility")?;

        if !gateway.refund_processed {
            return Err(StepError::permanent(
                "gateway refund must complete before updating records",
                codes::INVALID_DEPENDENCY,
            ));
        }
        if gateway.payment_id.contains("pay_test_record_lock") {
            return Err(StepError::retryable("payment record locked, will retry"));
        }

        let record_id = ids::prefixed("rec", ctx.rng(), 8);
        let remaining_balance = eligibility.original_amount - gateway.refund_amount;

        info!(
            "payment records updated: payment_id={}, refund_id={}, record_id={}",
            gateway.payment_id, gateway.refund_id, record_id
        );

        StepResult::from_typed(&PaymentRecordsResult {
            records_updated: true,
            payment_id: gateway.payment_id,
            refund_id: gateway.refund_id,
            record_id,
            payment_status: "refunded".into(),
            refund_status: "completed".into(),
            original_amount: eligibility.original_amount,
            refund_amount: gateway.refund_amount,
            remaining_balance,
            is_partial_refund: eligibility.is_partial_refund,
            history_entries_created: 2,
            audit_entry: AuditEntry {
                audit_id: ids::prefixed("aud", ctx.rng(), 8),
                action: "refund_processed".into(),
                refund_transaction_id: gateway.gateway_transaction_id,
                amount: gateway.refund_amount,
                performed_by: "system".into(),
            },
            updated_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct NotifyCustomer;

impl StepHandler for NotifyCustomer {
    fn name(&self) -> &str {
        "payments_notify_customer"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let gateway: GatewayRefundResult = deps.get("gateway")?;
        let eligibility: EligibilityResult = deps.get("eligibility")?;
        let records: PaymentRecordsResult = deps.get("records")?;
        let email = &eligibility.customer_email;

        if email.contains("@test_bounce") {
            return Err(StepError::permanent(
                format!("notification bounced for {email}"),
                codes::DELIVERY_FAILED,
            ));
        }
        if email.contains("@test_rate_limit") {
            return Err(StepError::retryable("notification rate limited"));
        }

        let refund_type = if records.is_partial_refund { "partial" } else { "full" };
        let subject = format!(
            "Your {} refund of {} for order {} has been processed",
            refund_type, gateway.refund_amount, eligibility.order_id
        );
        let body = format!(
            "We have processed a {} refund of {} to your {:?}. You should see it in approximately {} business days. Reference: {}",
            refund_type,
            gateway.refund_amount,
            gateway.payment_method,
            gateway.estimated_business_days,
            gateway.gateway_transaction_id
        );
        let message_id = ids::prefixed("msg", ctx.rng(), 12);

        info!("refund notification {} sent to {}", message_id, email);

        StepResult::from_typed(&RefundNotificationResult {
            notification_sent: true,
            customer_email: eligibility.customer_email,
            message_id,
            notification_type: "refund_confirmation".into(),
            subject,
            body,
            delivery_status: "delivered".into(),
            refund_id: gateway.refund_id,
            refund_amount: gateway.refund_amount,
            estimated_completion_days: gateway.estimated_business_days,
            sent_at: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> StepContext {
        StepContext::seeded(Uuid::nil(), "step", 1, 3)
    }

    fn inputs(payment_id: &str, email: &str, method: &str, amount: f64) -> TaskInputs {
        TaskInputs::new(json!({
            "payment_id": payment_id,
            "refund_amount": amount,
            "customer_email": email,
            "payment_method": method,
            "order_id": "ORD-1"
        }))
    }

    fn run_chain(inputs: &TaskInputs) -> Result<StepResult, StepError> {
        let mut deps = Dependencies::new();
        let eligibility = ValidatePaymentEligibility.execute(inputs, &deps, &mut ctx())?;
        deps.insert("eligibility", eligibility);
        let gateway = ProcessGatewayRefund.execute(inputs, &deps, &mut ctx())?;
        deps.insert("gateway", gateway);
        let records = UpdatePaymentRecords.execute(inputs, &deps, &mut ctx())?;
        deps.insert("records", records);
        NotifyCustomer.execute(inputs, &deps, &mut ctx())
    }

    #[test]
    fn gateway_fee_is_three_tenths_percent() {
        let inputs = inputs("pay_1", "a@example.com", "credit_card", 250.0);
        let mut deps = Dependencies::new();
        deps.insert(
            "eligibility",
            ValidatePaymentEligibility.execute(&inputs, &deps, &mut ctx()).unwrap(),
        );
        let gateway = ProcessGatewayRefund.execute(&inputs, &deps, &mut ctx()).unwrap();
        assert_eq!(gateway.get("gateway_fee"), Some(&json!(0.75)));
        assert_eq!(gateway.get("net_refund"), Some(&json!(249.25)));
        assert_eq!(gateway.get("gateway"), Some(&json!("stripe")));
        assert_eq!(gateway.get("estimated_business_days"), Some(&json!(5)));
    }

    #[test]
    fn unsupported_methods_are_permanent() {
        let crypto = inputs("pay_1", "a@example.com", "crypto", 10.0);
        assert!(!ValidatePaymentEligibility
            .execute(&crypto, &Dependencies::new(), &mut ctx())
            .unwrap_err()
            .is_retryable());

        let gift = inputs("pay_1", "a@example.com", "gift_card", 500.01);
        assert!(ValidatePaymentEligibility
            .execute(&gift, &Dependencies::new(), &mut ctx())
            .is_err());

        let absurd = inputs("pay_1", "a@example.com", "credit_card", 1e17);
        assert_eq!(
            ValidatePaymentEligibility
                .execute(&absurd, &Dependencies::new(), &mut ctx())
                .unwrap_err()
                .code(),
            Some(codes::INVALID_INPUT)
        );

        let gift_ok = inputs("pay_1", "a@example.com", "gift_card", 500.0);
        assert!(ValidatePaymentEligibility
            .execute(&gift_ok, &Dependencies::new(), &mut ctx())
            .is_ok());
    }

    #[test]
    fn simulated_payment_ids() {
        let cases = [
            ("pay_test_insufficient", Some(false)),
            ("pay_test_ineligible", Some(false)),
            ("pay_test_processing", Some(true)),
            ("pay_test_gateway_timeout", Some(true)),
            ("pay_test_gateway_error", Some(false)),
            ("pay_test_record_lock", Some(true)),
            ("pay_ok", None),
        ];
        for (payment_id, expected) in cases {
            let result = run_chain(&inputs(payment_id, "a@example.com", "debit_card", 40.0));
            assert_eq!(result.err().map(|e| e.is_retryable()), expected, "{payment_id}");
        }
    }

    #[test]
    fn notification_hooks() {
        let bounce = run_chain(&inputs("pay_1", "x@test_bounce.io", "credit_card", 10.0)).unwrap_err();
        assert_eq!(bounce.code(), Some(codes::DELIVERY_FAILED));

        let limited = run_chain(&inputs("pay_1", "x@test_rate_limit.io", "credit_card", 10.0)).unwrap_err();
        assert!(limited.is_retryable());
    }

    #[test]
    fn partial_refund_subject() {
        let note = run_chain(&inputs("pay_1", "a@example.com", "bank_transfer", 99.99)).unwrap();
        let subject = note.get("subject").and_then(|s| s.as_str()).unwrap();
        assert!(subject.starts_with("Your partial refund of $99.99"));
        assert_eq!(note.get("estimated_completion_days"), Some(&json!(7)));
    }
}
