//! Billing error types

use thiserror::Error;
use tradelab_shared::{PaymentProviderKind, SubscriptionStatus};
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid transition: cannot {action} a subscription in status {from}")]
    InvalidTransition {
        from: SubscriptionStatus,
        action: &'static str,
    },

    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("payment provider {provider} unavailable: {detail}")]
    ProviderUnavailable {
        provider: PaymentProviderKind,
        detail: String,
    },

    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("plan {0} is referenced by subscriptions and cannot be deleted")]
    PlanInUse(Uuid),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether a caller should retry the failed operation.
    ///
    /// Only provider outages and lock contention are worth retrying; every
    /// other variant will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ProviderUnavailable { .. } | BillingError::ConcurrentModification(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let outage = BillingError::ProviderUnavailable {
            provider: PaymentProviderKind::Stripe,
            detail: "timeout".to_string(),
        };
        assert!(outage.is_retryable());
        assert!(BillingError::ConcurrentModification("status changed".to_string()).is_retryable());
        assert!(!BillingError::SignatureInvalid.is_retryable());
        assert!(!BillingError::NotFound("subscription".to_string()).is_retryable());
    }

    #[test]
    fn invalid_transition_names_state_and_action() {
        let err = BillingError::InvalidTransition {
            from: SubscriptionStatus::Expired,
            action: "cancel",
        };
        assert_eq!(
            err.to_string(),
            "invalid transition: cannot cancel a subscription in status expired"
        );
    }
}
