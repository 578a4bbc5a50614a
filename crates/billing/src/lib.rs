// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! TradeLab Billing Module
//!
//! Handles subscription lifecycle, payment collection, and billing reconciliation.
//!
//! ## Features
//!
//! - **Subscriptions**: signup, activation, cancellation, expiration, plan changes
//! - **Payment Providers**: Stripe, Flutterwave, and NOWPayments behind one trait
//! - **Webhooks**: signature-verified provider events normalized into state transitions
//! - **Checkout**: payment creation and verification keyed by caller-owned order refs
//! - **Scheduler**: expiration sweep, renewal reminders, pending signup reaper
//! - **Settings**: runtime-tunable billing knobs with config defaults
//! - **Invariants**: runnable consistency checks over the billing tables

pub mod checkout;
pub mod config;
pub mod error;
mod flutterwave;
pub mod invariants;
pub mod notifications;
mod nowpayments;
pub mod providers;
pub mod scheduler;
pub mod settings;
pub mod store;
mod stripe;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutService, CheckoutStart, VerifyResult};

// Config
pub use config::{BillingConfig, ProviderCredentials, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Notifications
pub use notifications::{sender_from_env, NoopNotifier, NotificationSender, WebhookNotifier};

// Providers
pub use providers::{
    CreatedPayment, PaymentProvider, PaymentRequest, PaymentStatus, PaymentVerification,
    ProviderRegistry,
};

// Scheduler
pub use scheduler::{SchedulerRunSummary, SchedulerService, SweepSummary, AVAILABLE_TASKS};

// Settings
pub use settings::{AppSetting, SettingsDefaults, SettingsStore};

// Store
pub use store::{NewPlan, PlanUpdate, SubscriptionStore};

// Subscriptions
pub use subscriptions::{
    ActivationOutcome, CancelOutcome, PaymentDetails, PlanChangeSource, SignupResult,
    SubscriptionService, TransitionOutcome,
};

// Webhooks
pub use webhooks::{PaymentEvent, PaymentEventKind, SubscriptionRef, WebhookAck, WebhookHandler};

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub invariants: InvariantChecker,
    pub scheduler: SchedulerService,
    pub settings: SettingsStore,
    pub store: SubscriptionStore,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
    notifier: Arc<dyn NotificationSender>,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let notifier = sender_from_env();
        Ok(Self::new(config, pool, notifier))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: BillingConfig, pool: PgPool, notifier: Arc<dyn NotificationSender>) -> Self {
        let settings = SettingsStore::new(pool.clone(), SettingsDefaults::from_config(&config));

        Self {
            checkout: CheckoutService::new(&config, pool.clone(), settings.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            scheduler: SchedulerService::new(pool.clone(), settings.clone(), notifier.clone()),
            settings,
            store: SubscriptionStore::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            webhooks: WebhookHandler::new(config, pool, notifier.clone()),
            notifier,
        }
    }

    /// Cancel a subscription and tell its owner. The notice is best effort;
    /// the cancellation stands even if the send fails.
    pub async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        reason: Option<String>,
    ) -> BillingResult<CancelOutcome> {
        let outcome = self.subscriptions.cancel(subscription_id, reason).await?;
        if let CancelOutcome::Cancelled(subscription) = &outcome {
            self.notifier
                .send(
                    subscription.user_id,
                    notifications::templates::SUBSCRIPTION_CANCELLED,
                    &serde_json::json!({
                        "access_until": subscription.current_period_end.to_string(),
                    }),
                )
                .await;
        }
        Ok(outcome)
    }
}
