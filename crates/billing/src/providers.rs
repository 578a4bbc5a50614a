//! Payment provider port and the registry of configured providers.
//!
//! The trait speaks in domain actions, not provider primitives. Each
//! implementation maps those actions onto its provider's API and normalizes
//! responses into the value objects below, so nothing outside this crate
//! ever sees a provider-shaped payload.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tradelab_shared::PaymentProviderKind;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::flutterwave::FlutterwaveProvider;
use crate::nowpayments::NowpaymentsProvider;
use crate::stripe::StripeProvider;

/// What we ask a provider to collect.
///
/// `order_ref` is our idempotency key: it is generated once per signup or
/// renewal attempt and passed through to the provider, so resubmitting the
/// same request cannot double-charge.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_ref: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    /// Currency the customer settles in, for providers where it differs from
    /// the priced currency (crypto rails). Ignored elsewhere.
    pub pay_currency: Option<String>,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
}

/// Normalized payment state across all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A payment the provider has accepted for processing.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPayment {
    pub provider: PaymentProviderKind,
    /// Provider-side reference used to look the payment up later.
    pub provider_ref: String,
    pub status: PaymentStatus,
    /// Hosted page to send the user to, when the provider has one.
    pub checkout_url: Option<String>,
    /// Crypto deposit address, for providers that settle on-chain.
    pub pay_address: Option<String>,
}

/// The provider's authoritative answer for a payment reference.
#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub status: PaymentStatus,
    /// Settled amount when the provider reports one; never synthesized.
    pub amount_cents: Option<i64>,
    pub currency: String,
    /// Provider transaction id, used as the ledger idempotency key.
    pub external_txn_id: String,
    pub order_ref: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> PaymentProviderKind;

    /// Start collecting `request`. Not safe to blind-retry: callers must
    /// reuse the same `order_ref` when they resubmit.
    async fn create_payment(&self, request: &PaymentRequest) -> BillingResult<CreatedPayment>;

    /// Look up the current state of a payment. Read-only and safe to retry.
    async fn verify(&self, reference: &str) -> BillingResult<PaymentVerification>;

    /// Convert `amount_cents` of `from` currency into the amount of `to` the
    /// provider would settle. Providers without a rate API reject the call.
    async fn estimate(&self, amount_cents: i64, from: &str, to: &str) -> BillingResult<f64> {
        let _ = (amount_cents, from, to);
        Err(BillingError::InvalidRequest(format!(
            "{} does not support currency estimates",
            self.kind()
        )))
    }
}

/// Configured providers, keyed by kind. Built once at startup; unconfigured
/// providers simply are not present.
pub struct ProviderRegistry {
    providers: HashMap<PaymentProviderKind, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        let mut registry = Self::empty();

        if let Some(stripe) = &config.stripe {
            registry.register(Arc::new(StripeProvider::new(stripe.clone())));
        }
        if let Some(flutterwave) = &config.flutterwave {
            registry.register(Arc::new(FlutterwaveProvider::new(
                flutterwave.clone(),
                config.checkout_return_url.clone(),
            )));
        }
        if let Some(nowpayments) = &config.nowpayments {
            registry.register(Arc::new(NowpaymentsProvider::new(nowpayments.clone())));
        }

        if registry.providers.is_empty() {
            tracing::warn!("No payment providers configured; checkout is disabled");
        } else {
            tracing::info!(
                providers = ?registry.configured(),
                "Payment providers configured"
            );
        }

        registry
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: PaymentProviderKind) -> BillingResult<Arc<dyn PaymentProvider>> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            BillingError::InvalidRequest(format!("payment provider {} is not configured", kind))
        })
    }

    pub fn configured(&self) -> Vec<PaymentProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Result::unwrap_err` needs the Ok type to be Debug; provide a
    // test-only impl so tests can unwrap registry lookups.
    impl std::fmt::Debug for dyn PaymentProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "PaymentProvider({})", self.kind())
        }
    }

    struct StubProvider;

    #[async_trait]
    impl PaymentProvider for StubProvider {
        fn kind(&self) -> PaymentProviderKind {
            PaymentProviderKind::Flutterwave
        }

        async fn create_payment(&self, _request: &PaymentRequest) -> BillingResult<CreatedPayment> {
            Ok(CreatedPayment {
                provider: self.kind(),
                provider_ref: "stub".to_string(),
                status: PaymentStatus::Pending,
                checkout_url: None,
                pay_address: None,
            })
        }

        async fn verify(&self, _reference: &str) -> BillingResult<PaymentVerification> {
            Ok(PaymentVerification {
                status: PaymentStatus::Succeeded,
                amount_cents: Some(1000),
                currency: "USD".to_string(),
                external_txn_id: "txn".to_string(),
                order_ref: None,
            })
        }
    }

    // The registry hands out trait objects, so the trait must stay dyn safe.
    fn _accepts_dyn(_provider: &dyn PaymentProvider) {}

    #[tokio::test]
    async fn estimate_defaults_to_unsupported() {
        let provider = StubProvider;
        let err = provider.estimate(1000, "usd", "btc").await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidRequest(_)));
    }

    #[test]
    fn missing_provider_is_an_invalid_request() {
        let registry = ProviderRegistry::empty();
        let err = registry.get(PaymentProviderKind::Stripe).unwrap_err();
        assert!(matches!(err, BillingError::InvalidRequest(_)));
    }

    #[test]
    fn registry_lists_registered_kinds() {
        let mut registry = ProviderRegistry::empty();
        assert!(registry.is_empty());
        registry.register(Arc::new(StubProvider));
        assert_eq!(registry.configured(), vec![PaymentProviderKind::Flutterwave]);
    }
}
