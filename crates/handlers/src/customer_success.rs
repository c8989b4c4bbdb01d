//! Customer-success side of the refund flow.
//!
//! Five strictly sequential steps. `execute_refund_workflow` records the
//! hand-off to the payments namespace; the payments task itself is submitted
//! by the caller under the shared correlation id, never by this workflow.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::codes;
use crate::ids;
use crate::money::Money;
use crate::traits::{Dependencies, StepContext, StepHandler, StepInput, StepResult, TaskInputs};
use crate::StepError;

/// Largest single refund accepted by intake.
pub const MAX_REFUND: Money = Money::from_cents(1_000_000);

/// Simulated age of the original purchase.
const DAYS_SINCE_PURCHASE: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerTier {
    Standard,
    Gold,
    Premium,
}

impl CustomerTier {
    pub fn from_customer_id(customer_id: &str) -> Self {
        let id = customer_id.to_lowercase();
        if id.contains("vip") || id.contains("premium") {
            CustomerTier::Premium
        } else if id.contains("gold") {
            CustomerTier::Gold
        } else {
            CustomerTier::Standard
        }
    }

    pub fn policy(self) -> RefundPolicy {
        match self {
            CustomerTier::Standard => RefundPolicy {
                window_days: 30,
                requires_approval: true,
                max_amount: Money::from_cents(1_000_000),
            },
            CustomerTier::Gold => RefundPolicy {
                window_days: 60,
                requires_approval: false,
                max_amount: Money::from_cents(5_000_000),
            },
            CustomerTier::Premium => RefundPolicy {
                window_days: 90,
                requires_approval: false,
                max_amount: Money::from_cents(10_000_000),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    pub window_days: i64,
    pub requires_approval: bool,
    pub max_amount: Money,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequestInput {
    pub ticket_id: String,
    pub customer_id: String,
    pub refund_amount: Money,
    pub customer_email: String,
    #[serde(default)]
    pub refund_reason: Option<String>,
}

impl StepInput for RefundRequestInput {
    fn validate(&self) -> Result<(), StepError> {
        if self.ticket_id.trim().is_empty() {
            return Err(StepError::invalid_input("ticket_id must not be blank"));
        }
        if self.customer_id.trim().is_empty() {
            return Err(StepError::invalid_input("customer_id must not be blank"));
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
        if self.refund_amount > MAX_REFUND {
            return Err(StepError::permanent(
                format!(
                    "refund amount {} exceeds maximum single refund limit of {}",
                    self.refund_amount, MAX_REFUND
                ),
                codes::BUSINESS_RULE,
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRefundResult {
    pub request_validated: bool,
    pub ticket_id: String,
    pub customer_id: String,
    pub customer_email: String,
    pub ticket_status: String,
    pub customer_tier: CustomerTier,
    pub amount: Money,
    pub reason: String,
    pub original_purchase_date: String,
    pub payment_id: String,
    pub validated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheckResult {
    pub policy_checked: bool,
    pub policy_compliant: bool,
    pub customer_tier: CustomerTier,
    pub refund_window_days: i64,
    pub days_since_purchase: i64,
    pub within_refund_window: bool,
    pub requires_approval: bool,
    pub max_allowed_amount: Money,
    pub policy_checked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub approval_obtained: bool,
    pub approval_required: bool,
    pub auto_approved: bool,
    pub approval_id: Option<String>,
    pub approver: String,
    pub manager_notes: String,
    pub amount_approved: Money,
    pub approved_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    pub task_delegated: bool,
    pub target_namespace: String,
    pub target_workflow: String,
    pub delegated_task_id: String,
    pub delegated_task_status: String,
    pub payment_id: String,
    pub correlation_id: String,
    pub delegation_timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketUpdateResult {
    pub ticket_updated: bool,
    pub ticket_id: String,
    pub previous_status: String,
    pub new_status: String,
    pub resolution_note: String,
    pub refund_completed: bool,
    pub delegated_task_id: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct ValidateRefundRequest;

impl StepHandler for ValidateRefundRequest {
    fn name(&self) -> &str {
        "customer_success_validate_refund_request"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        _deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: RefundRequestInput = inputs.parse()?;

        if input.ticket_id.contains("ticket_closed") {
            return Err(StepError::permanent(
                "cannot process refund for closed ticket",
                codes::BUSINESS_RULE,
            ));
        }
        if input.ticket_id.contains("ticket_cancelled") {
            return Err(StepError::permanent(
                "cannot process refund for cancelled ticket",
                codes::BUSINESS_RULE,
            ));
        }

        let tier = CustomerTier::from_customer_id(&input.customer_id);
        let now = Utc::now();

        info!(
            "refund request validated: ticket={}, tier={:?}, amount={}",
            input.ticket_id, tier, input.refund_amount
        );

        StepResult::from_typed(&ValidateRefundResult {
            request_validated: true,
            ticket_id: input.ticket_id,
            customer_id: input.customer_id,
            customer_email: input.customer_email,
            ticket_status: "open".into(),
            customer_tier: tier,
            amount: input.refund_amount,
            reason: input.refund_reason.unwrap_or_else(|| "customer_request".into()),
            original_purchase_date: (now - Duration::days(DAYS_SINCE_PURCHASE)).to_rfc3339(),
            payment_id: ids::prefixed("pay", ctx.rng(), 12),
            validated_at: now.to_rfc3339(),
        })
    }
}

pub struct CheckRefundPolicy;

impl StepHandler for CheckRefundPolicy {
    fn name(&self) -> &str {
        "customer_success_check_refund_policy"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        _ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let validation: ValidateRefundResult = deps.get("validation")?;
        let policy = validation.customer_tier.policy();
        let within_window = DAYS_SINCE_PURCHASE <= policy.window_days;

        if !within_window {
            return Err(StepError::permanent(
                format!(
                    "refund request outside policy window: {} days (max {} days)",
                    DAYS_SINCE_PURCHASE, policy.window_days
                ),
                codes::POLICY_VIOLATION,
            ));
        }
        if validation.amount > policy.max_amount {
            return Err(StepError::permanent(
                format!(
                    "refund amount {} exceeds {:?} tier limit of {}",
                    validation.amount, validation.customer_tier, policy.max_amount
                ),
                codes::POLICY_VIOLATION,
            ));
        }

        info!(
            "policy check passed: tier={:?}, requires_approval={}",
            validation.customer_tier, policy.requires_approval
        );

        StepResult::from_typed(&PolicyCheckResult {
            policy_checked: true,
            policy_compliant: true,
            customer_tier: validation.customer_tier,
            refund_window_days: policy.window_days,
            days_since_purchase: DAYS_SINCE_PURCHASE,
            within_refund_window: within_window,
            requires_approval: policy.requires_approval,
            max_allowed_amount: policy.max_amount,
            policy_checked_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct GetManagerApproval;

impl StepHandler for GetManagerApproval {
    fn name(&self) -> &str {
        "customer_success_get_manager_approval"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let policy: PolicyCheckResult = deps.get("policy")?;
        let validation: ValidateRefundResult = deps.get("validation")?;
        let ticket_id = &validation.ticket_id;

        let result = if policy.requires_approval {
            if ticket_id.contains("ticket_denied") {
                return Err(StepError::permanent(
                    "manager denied refund request",
                    codes::APPROVAL_DENIED,
                ));
            }
            if ticket_id.contains("ticket_pending") {
                return Err(StepError::retryable("waiting for manager approval"));
            }

            let manager_id = format!("mgr_{}", (ticket_id.len() % 5) + 1);
            info!("refund approved by {} for ticket {}", manager_id, ticket_id);
            ApprovalResult {
                approval_obtained: true,
                approval_required: true,
                auto_approved: false,
                approval_id: Some(ids::prefixed("appr", ctx.rng(), 12)),
                manager_notes: format!(
                    "Manager-approved refund of {} for customer {}",
                    validation.amount, validation.customer_id
                ),
                approver: manager_id,
                amount_approved: validation.amount,
                approved_at: Utc::now().to_rfc3339(),
            }
        } else {
            info!(
                "refund auto-approved for tier={:?}, ticket={}",
                policy.customer_tier, ticket_id
            );
            ApprovalResult {
                approval_obtained: true,
                approval_required: false,
                auto_approved: true,
                approval_id: None,
                approver: "system".into(),
                manager_notes: format!(
                    "Auto-approved for customer tier {:?}",
                    policy.customer_tier
                )
                .to_lowercase(),
                amount_approved: validation.amount,
                approved_at: Utc::now().to_rfc3339(),
            }
        };

        StepResult::from_typed(&result)
    }
}

pub struct ExecuteRefundWorkflow;

impl StepHandler for ExecuteRefundWorkflow {
    fn name(&self) -> &str {
        "customer_success_execute_refund_workflow"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let approval: ApprovalResult = deps.get("approval")?;
        let validation: ValidateRefundResult = deps.get("validation")?;

        if !approval.approval_obtained {
            return Err(StepError::permanent(
                "approval must be obtained before executing refund",
                codes::BUSINESS_RULE,
            ));
        }

        let delegated_task_id = ids::prefixed("task", ctx.rng(), 16);
        let correlation_id = format!("cs-corr_{}", ids::hex_token(ctx.rng(), 12));

        info!(
            "refund delegated to payments: task={}, correlation={}, ticket={}",
            delegated_task_id, correlation_id, validation.ticket_id
        );

        StepResult::from_typed(&DelegationResult {
            task_delegated: true,
            target_namespace: "payments".into(),
            target_workflow: "process_refund".into(),
            delegated_task_id,
            delegated_task_status: "created".into(),
            payment_id: validation.payment_id,
            correlation_id,
            delegation_timestamp: Utc::now().to_rfc3339(),
        })
    }
}

pub struct UpdateTicketStatus;

impl StepHandler for UpdateTicketStatus {
    fn name(&self) -> &str {
        "customer_success_update_ticket_status"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        _ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let execution: DelegationResult = deps.get("execution")?;
        let validation: ValidateRefundResult = deps.get("validation")?;

        if validation.ticket_id.contains("ticket_locked") {
            warn!("ticket {} is locked, will retry", validation.ticket_id);
            return Err(StepError::retryable("ticket is locked by another agent"));
        }

        let resolution_note = format!(
            "Refund of {} delegated to payments. Task: {}. Correlation: {}. Customer notified at {}.",
            validation.amount,
            execution.delegated_task_id,
            execution.correlation_id,
            validation.customer_email
        );

        info!("ticket {} resolved", validation.ticket_id);

        StepResult::from_typed(&TicketUpdateResult {
            ticket_updated: true,
            ticket_id: validation.ticket_id,
            previous_status: "in_progress".into(),
            new_status: "resolved".into(),
            resolution_note,
            refund_completed: true,
            delegated_task_id: execution.delegated_task_id,
            updated_at: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> StepContext {
        StepContext::seeded(Uuid::nil(), "step", 1, 5)
    }

    fn request(ticket_id: &str, customer_id: &str, amount: f64) -> TaskInputs {
        TaskInputs::new(json!({
            "ticket_id": ticket_id,
            "customer_id": customer_id,
            "refund_amount": amount,
            "customer_email": "buyer@example.com"
        }))
    }

    fn validated(ticket_id: &str, customer_id: &str, amount: f64) -> Dependencies {
        let inputs = request(ticket_id, customer_id, amount);
        let validation = ValidateRefundRequest
            .execute(&inputs, &Dependencies::new(), &mut ctx())
            .expect("request should validate");
        let mut deps = Dependencies::new();
        deps.insert("validation", validation);
        deps
    }

    #[test]
    fn tier_from_customer_id() {
        assert_eq!(CustomerTier::from_customer_id("cust_VIP_9"), CustomerTier::Premium);
        assert_eq!(CustomerTier::from_customer_id("gold-42"), CustomerTier::Gold);
        assert_eq!(CustomerTier::from_customer_id("c-1"), CustomerTier::Standard);
    }

    #[test]
    fn closed_ticket_and_oversized_amount_are_rejected() {
        let err = ValidateRefundRequest
            .execute(&request("ticket_closed_1", "c-1", 10.0), &Dependencies::new(), &mut ctx())
            .unwrap_err();
        assert!(!err.is_retryable());

        let err = ValidateRefundRequest
            .execute(&request("t-1", "c-1", 10_000.01), &Dependencies::new(), &mut ctx())
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::BUSINESS_RULE));

        let err = ValidateRefundRequest
            .execute(&request("t-1", "c-1", 1e17), &Dependencies::new(), &mut ctx())
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_INPUT));
    }

    #[test]
    fn standard_tier_needs_manager() {
        let mut deps = validated("t-12345", "c-1", 120.0);
        let policy = CheckRefundPolicy.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        assert_eq!(policy.get("requires_approval"), Some(&json!(true)));
        deps.insert("policy", policy);

        let approval = GetManagerApproval.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        // "t-12345".len() == 7
        assert_eq!(approval.get("approver"), Some(&json!("mgr_3")));
    }

    #[test]
    fn gold_tier_is_auto_approved() {
        let mut deps = validated("t-1", "gold-7", 120.0);
        let policy = CheckRefundPolicy.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        deps.insert("policy", policy);
        let approval = GetManagerApproval.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        assert_eq!(approval.get("auto_approved"), Some(&json!(true)));
        assert_eq!(approval.get("approver"), Some(&json!("system")));
    }

    #[test]
    fn pending_ticket_is_retryable_denied_is_permanent() {
        for (ticket, retryable) in [("ticket_pending_1", true), ("ticket_denied_1", false)] {
            let mut deps = validated(ticket, "c-1", 50.0);
            let policy = CheckRefundPolicy.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
            deps.insert("policy", policy);
            let err = GetManagerApproval
                .execute(&TaskInputs::default(), &deps, &mut ctx())
                .unwrap_err();
            assert_eq!(err.is_retryable(), retryable, "{ticket}");
        }
    }

    #[test]
    fn full_chain_resolves_ticket() {
        let mut deps = validated("t-9", "premium-1", 75.5);
        let policy = CheckRefundPolicy.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        deps.insert("policy", policy);
        let approval = GetManagerApproval.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        deps.insert("approval", approval);
        let execution = ExecuteRefundWorkflow.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        assert_eq!(execution.get("target_namespace"), Some(&json!("payments")));
        deps.insert("execution", execution);

        let ticket = UpdateTicketStatus.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        assert_eq!(ticket.get("new_status"), Some(&json!("resolved")));
    }

    #[test]
    fn locked_ticket_is_retryable() {
        let mut deps = validated("ticket_locked_2", "gold-1", 20.0);
        let policy = CheckRefundPolicy.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        deps.insert("policy", policy);
        let approval = GetManagerApproval.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        deps.insert("approval", approval);
        let execution = ExecuteRefundWorkflow.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        deps.insert("execution", execution);

        let err = UpdateTicketStatus
            .execute(&TaskInputs::default(), &deps, &mut ctx())
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
