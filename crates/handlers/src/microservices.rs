//! User registration across services.
//!
//! `create_user_account` fans out to `setup_billing_profile` and
//! `initialize_preferences`; both converge at `send_welcome_sequence`, and
//! `update_user_status` finalizes the account.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::codes;
use crate::ids;
use crate::money::Money;
use crate::traits::{Dependencies, StepContext, StepHandler, StepInput, StepResult, TaskInputs};
use crate::StepError;

/// Account that already exists upstream; creation is an idempotent success.
const EXISTING_EMAIL: &str = "existing@example.com";
const BLOCKED_DOMAIN: &str = "@blocked.test";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    fn monthly_price(self) -> Money {
        match self {
            Plan::Free => Money::ZERO,
            Plan::Pro => Money::from_cents(2_999),
            Plan::Enterprise => Money::from_cents(29_999),
        }
    }

    fn trial_days(self) -> i64 {
        match self {
            Plan::Free => 0,
            Plan::Pro => 14,
            Plan::Enterprise => 30,
        }
    }

    fn features(self) -> Vec<String> {
        let all = [
            "basic_features",
            "advanced_analytics",
            "priority_support",
            "custom_integrations",
        ];
        let n = match self {
            Plan::Free => 1,
            Plan::Pro => 2,
            Plan::Enterprise => 4,
        };
        all[..n].iter().map(|f| f.to_string()).collect()
    }

    fn quotas(self) -> Quotas {
        let (storage_gb, api_calls_per_month) = match self {
            Plan::Free => (5, 1_000),
            Plan::Pro => (100, 100_000),
            Plan::Enterprise => (1_000, 1_000_000),
        };
        Quotas {
            storage_gb,
            api_calls_per_month,
        }
    }

    fn default_preferences(self) -> Map<String, Value> {
        let paid = self != Plan::Free;
        let mut prefs = Map::new();
        prefs.insert("email_notifications".into(), json!(true));
        prefs.insert("marketing_emails".into(), json!(paid));
        prefs.insert("product_updates".into(), json!(true));
        prefs.insert("weekly_digest".into(), json!(paid));
        prefs.insert("theme".into(), json!(if paid { "dark" } else { "light" }));
        prefs.insert("language".into(), json!("en"));
        prefs.insert("timezone".into(), json!("UTC"));
        if paid {
            prefs.insert("api_notifications".into(), json!(true));
        }
        if self == Plan::Enterprise {
            prefs.insert("audit_logs".into(), json!(true));
            prefs.insert("advanced_reports".into(), json!(true));
        }
        prefs
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationInput {
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub preferences: Option<Map<String, Value>>,
}

impl StepInput for RegistrationInput {
    fn validate(&self) -> Result<(), StepError> {
        let email = self.email.trim();
        if email.len() < 5 || !email.contains('@') || !email.contains('.') {
            return Err(StepError::invalid_input(format!(
                "invalid email format: {email}"
            )));
        }
        if self.full_name.trim().is_empty() {
            return Err(StepError::invalid_input("full_name must not be blank"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PreferencesInput {
    #[serde(default)]
    preferences: Option<Map<String, Value>>,
}

impl StepInput for PreferencesInput {}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotas {
    pub storage_gb: u64,
    pub api_calls_per_month: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserResult {
    pub user_id: String,
    pub account_number: Option<String>,
    pub email: String,
    pub name: String,
    pub plan: Plan,
    pub source: String,
    pub phone: Option<String>,
    pub initial_quotas: Quotas,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingResult {
    pub billing_id: String,
    pub user_id: String,
    pub plan: Plan,
    pub price: Money,
    pub currency: String,
    pub billing_cycle: String,
    pub features: Vec<String>,
    pub billing_required: bool,
    pub status: String,
    pub trial_period_days: i64,
    pub next_billing_date: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub advanced_analytics: bool,
    pub api_access: bool,
    pub custom_branding: bool,
    pub priority_support: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesResult {
    pub preferences_id: String,
    pub user_id: String,
    pub plan: Plan,
    pub preferences: Map<String, Value>,
    pub defaults_applied: usize,
    pub customizations: usize,
    pub feature_flags: FeatureFlags,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub message_id: String,
    pub channel: String,
    pub subject: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeResult {
    pub user_id: String,
    pub plan: Plan,
    pub channels_used: Vec<String>,
    pub messages_sent: usize,
    pub messages_detail: Vec<WelcomeMessage>,
    pub welcome_sequence_id: String,
    pub upgrade_prompt: Option<String>,
    pub status: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusResult {
    pub user_id: String,
    pub email: String,
    pub status: String,
    pub plan: Plan,
    pub registration_summary: BTreeMap<String, Value>,
    pub all_services_coordinated: bool,
    pub services_completed: Vec<String>,
    pub activation_timestamp: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub struct CreateUserAccount;

impl StepHandler for CreateUserAccount {
    fn name(&self) -> &str {
        "microservices_create_user_account"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        _deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: RegistrationInput = inputs.parse()?;
        let email = input.email.trim().to_lowercase();

        if email.ends_with(BLOCKED_DOMAIN) {
            return Err(StepError::permanent(
                format!("email domain is blocked: {email}"),
                codes::BLOCKED,
            ));
        }

        let (user_id, account_number, status) = if email == EXISTING_EMAIL {
            info!("user {} already exists, returning existing account", email);
            ("user_existing_001".to_string(), None, "already_exists")
        } else {
            (
                ids::prefixed("usr", ctx.rng(), 12),
                Some(format!("ACC-{}", ids::hex_token(ctx.rng(), 8).to_uppercase())),
                "created",
            )
        };

        info!("user account {} ({}) on {:?} plan", user_id, email, input.plan);

        StepResult::from_typed(&CreateUserResult {
            user_id,
            account_number,
            email,
            name: input.full_name,
            plan: input.plan,
            source: input.source.unwrap_or_else(|| "web".into()),
            phone: input.phone,
            initial_quotas: input.plan.quotas(),
            status: status.into(),
            created_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct SetupBillingProfile;

impl StepHandler for SetupBillingProfile {
    fn name(&self) -> &str {
        "microservices_setup_billing_profile"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let user: CreateUserResult = deps.get("user")?;
        let plan = user.plan;
        let billing_required = plan != Plan::Free;
        let now = Utc::now();

        if billing_required {
            info!("billing profile for {}: {:?} at {}/mo", user.user_id, plan, plan.monthly_price());
        } else {
            info!("billing skipped for {} (free plan)", user.user_id);
        }

        StepResult::from_typed(&BillingResult {
            billing_id: ids::prefixed("bill", ctx.rng(), 10),
            user_id: user.user_id,
            plan,
            price: plan.monthly_price(),
            currency: "USD".into(),
            billing_cycle: "monthly".into(),
            features: plan.features(),
            billing_required,
            status: if billing_required { "active" } else { "skipped_free_plan" }.into(),
            trial_period_days: plan.trial_days(),
            next_billing_date: billing_required
                .then(|| (now + Duration::days(30)).to_rfc3339()),
            created_at: now.to_rfc3339(),
        })
    }
}

pub struct InitializePreferences;

impl StepHandler for InitializePreferences {
    fn name(&self) -> &str {
        "microservices_initialize_preferences"
    }

    fn execute(
        &self,
        inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let input: PreferencesInput = inputs.parse()?;
        let user: CreateUserResult = deps.get("user")?;

        let mut preferences = user.plan.default_preferences();
        let defaults_applied = preferences.len();
        let custom = input.preferences.unwrap_or_default();
        let customizations = custom.len();
        preferences.extend(custom);

        let feature_flags = FeatureFlags {
            advanced_analytics: user.plan != Plan::Free,
            api_access: user.plan != Plan::Free,
            custom_branding: user.plan == Plan::Enterprise,
            priority_support: user.plan == Plan::Enterprise,
        };

        info!(
            "preferences for {}: {} defaults + {} customizations",
            user.user_id, defaults_applied, customizations
        );

        StepResult::from_typed(&PreferencesResult {
            preferences_id: ids::prefixed("pref", ctx.rng(), 8),
            user_id: user.user_id,
            plan: user.plan,
            preferences,
            defaults_applied,
            customizations,
            feature_flags,
            status: "active".into(),
            created_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct SendWelcomeSequence;

impl StepHandler for SendWelcomeSequence {
    fn name(&self) -> &str {
        "microservices_send_welcome_sequence"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let user: CreateUserResult = deps.get("user")?;
        let billing: BillingResult = deps.get("billing")?;
        let prefs: PreferencesResult = deps.get("preferences")?;

        let (subject, upgrade_prompt) = match user.plan {
            Plan::Free => (
                "Welcome to Our Platform!",
                Some("Upgrade to Pro for advanced features"),
            ),
            Plan::Pro => (
                "Welcome to Pro!",
                Some("Consider Enterprise for dedicated support"),
            ),
            Plan::Enterprise => ("Welcome to Enterprise!", None),
        };

        let email_enabled = prefs
            .preferences
            .get("email_notifications")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut channels = Vec::new();
        if email_enabled {
            channels.push(("email", "sent"));
        }
        channels.push(("in_app", "delivered"));
        if user.plan == Plan::Enterprise {
            channels.push(("sms", "sent"));
        }

        let messages_detail: Vec<WelcomeMessage> = channels
            .iter()
            .map(|(channel, status)| WelcomeMessage {
                message_id: ids::prefixed(&format!("msg_{channel}"), ctx.rng(), 8),
                channel: channel.to_string(),
                subject: subject.to_string(),
                status: status.to_string(),
            })
            .collect();

        info!(
            "welcome sequence for {} ({}): {} channels, billing {}",
            user.name,
            user.email,
            messages_detail.len(),
            billing.billing_id
        );

        StepResult::from_typed(&WelcomeResult {
            user_id: user.user_id,
            plan: user.plan,
            channels_used: channels.iter().map(|(c, _)| c.to_string()).collect(),
            messages_sent: messages_detail.len(),
            messages_detail,
            welcome_sequence_id: ids::prefixed("welcome", ctx.rng(), 12),
            upgrade_prompt: upgrade_prompt.map(str::to_string),
            status: "sent".into(),
            sent_at: Utc::now().to_rfc3339(),
        })
    }
}

pub struct UpdateUserStatus;

impl StepHandler for UpdateUserStatus {
    fn name(&self) -> &str {
        "microservices_update_user_status"
    }

    fn execute(
        &self,
        _inputs: &TaskInputs,
        deps: &Dependencies,
        _ctx: &mut StepContext,
    ) -> Result<StepResult, StepError> {
        let user: CreateUserResult = deps.get("user")?;
        let billing: BillingResult = deps.get("billing")?;
        let prefs: PreferencesResult = deps.get("preferences")?;
        let welcome: WelcomeResult = deps.get("welcome")?;

        let now = Utc::now().to_rfc3339();
        let mut summary = BTreeMap::new();
        summary.insert("user_id".to_string(), json!(user.user_id));
        summary.insert("email".to_string(), json!(user.email));
        summary.insert("plan".to_string(), json!(user.plan));
        summary.insert("registration_status".to_string(), json!("complete"));
        if billing.billing_required {
            summary.insert("billing_id".to_string(), json!(billing.billing_id));
            summary.insert("next_billing_date".to_string(), json!(billing.next_billing_date));
        }
        summary.insert("preferences_count".to_string(), json!(prefs.preferences.len()));
        summary.insert("notification_channels".to_string(), json!(welcome.channels_used));
        summary.insert("registration_completed_at".to_string(), json!(now));

        info!("user {} activated on {:?} plan", user.user_id, user.plan);

        StepResult::from_typed(&UserStatusResult {
            user_id: user.user_id,
            email: user.email,
            status: "active".into(),
            plan: user.plan,
            registration_summary: summary,
            all_services_coordinated: true,
            services_completed: vec![
                "user_service".into(),
                "billing_service".into(),
                "preferences_service".into(),
                "notification_service".into(),
            ],
            activation_timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> StepContext {
        StepContext::seeded(Uuid::nil(), "step", 1, 11)
    }

    fn register(plan: &str) -> (TaskInputs, StepResult) {
        let inputs = TaskInputs::new(json!({
            "email": "new.user@example.com",
            "full_name": "New User",
            "plan": plan,
            "preferences": { "theme": "solarized" }
        }));
        let user = CreateUserAccount
            .execute(&inputs, &Dependencies::new(), &mut ctx())
            .expect("user should be created");
        (inputs, user)
    }

    #[test]
    fn blocked_domain_is_permanent() {
        let inputs = TaskInputs::new(json!({ "email": "spam@blocked.test", "full_name": "X" }));
        let err = CreateUserAccount
            .execute(&inputs, &Dependencies::new(), &mut ctx())
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::BLOCKED));
    }

    #[test]
    fn unknown_plan_is_invalid_input() {
        let inputs = TaskInputs::new(json!({
            "email": "a@example.com", "full_name": "A", "plan": "platinum"
        }));
        let err = CreateUserAccount
            .execute(&inputs, &Dependencies::new(), &mut ctx())
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_INPUT));
    }

    #[test]
    fn existing_account_is_idempotent_success() {
        let inputs = TaskInputs::new(json!({ "email": "existing@example.com", "full_name": "E" }));
        let user = CreateUserAccount
            .execute(&inputs, &Dependencies::new(), &mut ctx())
            .unwrap();
        assert_eq!(user.get("status"), Some(&json!("already_exists")));
        assert_eq!(user.get("user_id"), Some(&json!("user_existing_001")));
    }

    #[test]
    fn free_plan_skips_billing() {
        let (_, user) = register("free");
        let deps: Dependencies = [("user".to_string(), user)].into_iter().collect();
        let billing = SetupBillingProfile.execute(&TaskInputs::default(), &deps, &mut ctx()).unwrap();
        assert_eq!(billing.get("status"), Some(&json!("skipped_free_plan")));
        assert_eq!(billing.get("price"), Some(&json!(0.0)));
    }

    #[test]
    fn enterprise_registration_uses_three_channels() {
        let (inputs, user) = register("enterprise");
        let mut deps: Dependencies = [("user".to_string(), user)].into_iter().collect();

        let billing = SetupBillingProfile.execute(&inputs, &deps, &mut ctx()).unwrap();
        assert_eq!(billing.get("price"), Some(&json!(299.99)));
        let prefs = InitializePreferences.execute(&inputs, &deps, &mut ctx()).unwrap();
        assert_eq!(prefs.get("customizations"), Some(&json!(1)));
        assert_eq!(prefs.get("preferences").and_then(|p| p.get("theme")), Some(&json!("solarized")));

        deps.insert("billing", billing);
        deps.insert("preferences", prefs);
        let welcome = SendWelcomeSequence.execute(&inputs, &deps, &mut ctx()).unwrap();
        assert_eq!(welcome.get("channels_used"), Some(&json!(["email", "in_app", "sms"])));

        deps.insert("welcome", welcome);
        let status = UpdateUserStatus.execute(&inputs, &deps, &mut ctx()).unwrap();
        assert_eq!(status.get("status"), Some(&json!("active")));
        assert_eq!(status.get("all_services_coordinated"), Some(&json!(true)));
    }
}
