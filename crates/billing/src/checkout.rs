//! Hosted-checkout orchestration.
//!
//! Ties signup records to provider payments: `start_checkout` creates or
//! reuses a pending signup and asks the provider for a payment; `verify`
//! confirms a returning user's payment server-side instead of trusting the
//! redirect. Activation through either path is interchangeable with the
//! webhook path, whichever lands first.

use serde::Serialize;
use sqlx::PgPool;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tradelab_shared::{PaymentProviderKind, UserSubscription};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::providers::{CreatedPayment, PaymentRequest, PaymentStatus, ProviderRegistry};
use crate::settings::SettingsStore;
use crate::store::SubscriptionStore;
use crate::subscriptions::{ActivationOutcome, PaymentDetails, SubscriptionService};

#[derive(Debug, Serialize)]
pub struct CheckoutStart {
    pub subscription_id: Uuid,
    pub order_ref: String,
    pub provider: PaymentProviderKind,
    /// None for free plans, which activate without payment.
    pub payment: Option<CreatedPayment>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub status: PaymentStatus,
    pub subscription: Option<UserSubscription>,
}

pub struct CheckoutService {
    registry: ProviderRegistry,
    store: SubscriptionStore,
    subscriptions: SubscriptionService,
    settings: SettingsStore,
}

impl CheckoutService {
    pub fn new(config: &BillingConfig, pool: PgPool, settings: SettingsStore) -> Self {
        Self {
            registry: ProviderRegistry::from_config(config),
            store: SubscriptionStore::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool),
            settings,
        }
    }

    pub fn configured_providers(&self) -> Vec<PaymentProviderKind> {
        self.registry.configured()
    }

    /// Begin checkout for a plan. Free plans activate on the spot and return
    /// no payment. Retrying while a signup is still open reuses its
    /// order_ref, so the provider sees one idempotency key per purchase
    /// attempt instead of a fresh charge per page load.
    pub async fn start_checkout(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        provider_kind: PaymentProviderKind,
        customer_email: Option<String>,
        pay_currency: Option<String>,
    ) -> BillingResult<CheckoutStart> {
        let plan = self.store.get_plan(plan_id).await?;

        if plan.is_free() {
            let signup = self
                .subscriptions
                .create_signup(user_id, plan_id, provider_kind, 0)
                .await?;
            return Ok(CheckoutStart {
                subscription_id: signup.subscription.id,
                order_ref: signup.order_ref,
                provider: provider_kind,
                payment: None,
            });
        }

        let provider = self.registry.get(provider_kind)?;

        let (subscription_id, order_ref, pending_id) = match self
            .store
            .find_open_pending(user_id, plan_id, provider_kind)
            .await?
        {
            Some(pending) => (pending.subscription_id, pending.order_ref, pending.id),
            None => {
                let trial_days = self.settings.signup_trial_days().await?;
                let signup = self
                    .subscriptions
                    .create_signup(user_id, plan_id, provider_kind, trial_days)
                    .await?;
                let pending = signup.pending.ok_or_else(|| {
                    BillingError::Internal("paid signup created no pending record".to_string())
                })?;
                (signup.subscription.id, signup.order_ref, pending.id)
            }
        };

        let request = PaymentRequest {
            order_ref: order_ref.clone(),
            amount_cents: plan.price_cents,
            currency: plan.currency.clone(),
            description: format!("{} ({})", plan.display_name, plan.billing_cycle),
            customer_email,
            pay_currency,
            subscription_id,
            user_id,
        };

        let payment = provider.create_payment(&request).await?;
        self.store
            .set_pending_provider_ref(pending_id, &payment.provider_ref)
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            provider = %provider_kind,
            order_ref = %order_ref,
            "Checkout started"
        );

        Ok(CheckoutStart {
            subscription_id,
            order_ref,
            provider: provider_kind,
            payment: Some(payment),
        })
    }

    /// Server-side confirmation for a user returning from checkout. Asks the
    /// provider for the payment's real state rather than trusting redirect
    /// query parameters. Only the order's owner may verify it; a mismatch
    /// reads the same as an unknown order so refs cannot be probed.
    pub async fn verify_payment(&self, order_ref: &str, owner: Uuid) -> BillingResult<VerifyResult> {
        let pending = self
            .store
            .find_pending_by_order_ref(order_ref)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("order {}", order_ref)))?;

        if pending.user_id != owner {
            tracing::warn!(
                user_id = %owner,
                order_ref = %order_ref,
                "Checkout verification attempted against another user's order"
            );
            return Err(BillingError::NotFound(format!("order {}", order_ref)));
        }

        let provider = self.registry.get(pending.provider)?;
        let reference = pending
            .provider_ref
            .clone()
            .unwrap_or_else(|| pending.order_ref.clone());

        // A short retry pass absorbs transient provider blips; anything
        // beyond that surfaces to the caller as retryable.
        let strategy = ExponentialBackoff::from_millis(500).factor(2).take(2);
        let verification = RetryIf::spawn(
            strategy,
            || provider.verify(&reference),
            |e: &BillingError| e.is_retryable(),
        )
        .await?;

        match verification.status {
            PaymentStatus::Succeeded => {
                let plan = self.store.get_plan(pending.plan_id).await?;
                let payment = PaymentDetails {
                    transaction_id: verification.external_txn_id,
                    provider: pending.provider,
                    amount_cents: verification.amount_cents,
                    currency: Some(verification.currency),
                };

                match self
                    .subscriptions
                    .activate(pending.subscription_id, plan.period_length_days(), payment)
                    .await?
                {
                    ActivationOutcome::Applied(subscription) => Ok(VerifyResult {
                        status: PaymentStatus::Succeeded,
                        subscription: Some(subscription),
                    }),
                    ActivationOutcome::AlreadyProcessed => {
                        let subscription =
                            self.store.get_subscription(pending.subscription_id).await?;
                        Ok(VerifyResult {
                            status: PaymentStatus::Succeeded,
                            subscription: Some(subscription),
                        })
                    }
                    ActivationOutcome::Skipped(status) => Err(BillingError::InvalidTransition {
                        from: status,
                        action: "activate",
                    }),
                }
            }
            status => Ok(VerifyResult {
                status,
                subscription: None,
            }),
        }
    }

    /// Currency conversion estimate from a provider that supports it.
    pub async fn estimate(
        &self,
        provider_kind: PaymentProviderKind,
        amount_cents: i64,
        from_currency: &str,
        to_currency: &str,
    ) -> BillingResult<f64> {
        let provider = self.registry.get(provider_kind)?;
        provider
            .estimate(amount_cents, from_currency, to_currency)
            .await
    }
}
