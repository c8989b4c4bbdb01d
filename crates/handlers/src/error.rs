//! Step-level error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known error codes attached to [`StepError::Permanent`].
pub mod codes {
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const MISSING_DEPENDENCY: &str = "MISSING_DEPENDENCY";
    pub const INVALID_DEPENDENCY: &str = "INVALID_DEPENDENCY";
    pub const BUSINESS_RULE: &str = "BUSINESS_RULE";
    pub const PAYMENT_DECLINED: &str = "PAYMENT_DECLINED";
    pub const BLOCKED: &str = "BLOCKED";
    pub const POLICY_VIOLATION: &str = "POLICY_VIOLATION";
    pub const APPROVAL_DENIED: &str = "APPROVAL_DENIED";
    pub const GATEWAY_REJECTED: &str = "GATEWAY_REJECTED";
    pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";
    pub const RETRIES_EXHAUSTED: &str = "RETRIES_EXHAUSTED";
    /// The handler or the engine around it panicked.
    pub const INTERNAL: &str = "INTERNAL";
}

/// Errors returned by a step handler's `execute` method.
///
/// The engine uses the variant to decide what happens next:
/// - `Retryable`: the step is rescheduled with exponential back-off.
/// - `Permanent`: the step fails and every dependent step becomes unreachable.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The step can never succeed with these inputs.
    #[error("permanent step error [{code}]: {message}")]
    Permanent { message: String, code: String },

    /// Transient failure; the step holds no retry state of its own.
    #[error("retryable step error: {message}")]
    Retryable { message: String },
}

impl StepError {
    pub fn permanent(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure on task-level input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::permanent(message, codes::INVALID_INPUT)
    }

    pub fn missing_dependency(name: &str) -> Self {
        Self::permanent(format!("missing dependency: {name}"), codes::MISSING_DEPENDENCY)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Permanent { message, .. } | Self::Retryable { message } => message,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Permanent { code, .. } => Some(code),
            Self::Retryable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dependency_names_the_alias() {
        let err = StepError::missing_dependency("cart_total");
        assert_eq!(err.message(), "missing dependency: cart_total");
        assert_eq!(err.code(), Some(codes::MISSING_DEPENDENCY));
        assert!(!err.is_retryable());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let err = StepError::retryable("gateway busy");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "retryable");
        assert_eq!(json["message"], "gateway busy");
    }
}
