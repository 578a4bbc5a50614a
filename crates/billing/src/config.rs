//! Billing configuration loaded from environment variables.
//!
//! Each payment provider is optional: a deployment can run with any subset of
//! Stripe, Flutterwave and NOWPayments configured. A provider with only half
//! of its credential pair set is treated as a misconfiguration and rejected
//! at startup rather than silently ignored.

use crate::error::{BillingError, BillingResult};
use std::time::Duration;

pub const FLUTTERWAVE_API_URL: &str = "https://api.flutterwave.com/v3";
pub const NOWPAYMENTS_API_URL: &str = "https://api.nowpayments.io/v1";

/// Upper bound on any single provider HTTP call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials for Stripe plus the redirect URLs checkout sessions need.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// API key and webhook signing secret for a REST provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub webhook_secret: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub stripe: Option<StripeConfig>,
    pub flutterwave: Option<ProviderCredentials>,
    pub nowpayments: Option<ProviderCredentials>,
    /// Where hosted checkout pages send the user back to afterwards.
    pub checkout_return_url: String,
    /// Days before period end at which a renewal reminder is sent. The
    /// settings store can override this at runtime.
    pub reminder_window_days: i64,
    /// Trial window granted to paid signups. Defaults to zero, which means
    /// payment-first signup with no free access.
    pub signup_trial_days: i64,
    /// How long an unpaid signup is kept before the worker reaps it.
    pub pending_signup_ttl_hours: i64,
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        let app_url =
            std::env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let stripe = match (opt_env("STRIPE_SECRET_KEY"), opt_env("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig {
                secret_key,
                webhook_secret,
                success_url: std::env::var("CHECKOUT_SUCCESS_URL")
                    .unwrap_or_else(|_| format!("{}/billing/success", app_url)),
                cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                    .unwrap_or_else(|_| format!("{}/billing/cancelled", app_url)),
            }),
            (None, None) => None,
            _ => {
                return Err(BillingError::Config(
                    "STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET must be set together".to_string(),
                ))
            }
        };

        let flutterwave = credential_pair(
            "FLUTTERWAVE_SECRET_KEY",
            "FLUTTERWAVE_WEBHOOK_SECRET",
            "FLUTTERWAVE_API_URL",
            FLUTTERWAVE_API_URL,
        )?;

        let nowpayments = credential_pair(
            "NOWPAYMENTS_API_KEY",
            "NOWPAYMENTS_IPN_SECRET",
            "NOWPAYMENTS_API_URL",
            NOWPAYMENTS_API_URL,
        )?;

        Ok(Self {
            stripe,
            flutterwave,
            nowpayments,
            checkout_return_url: std::env::var("CHECKOUT_RETURN_URL")
                .unwrap_or_else(|_| format!("{}/billing/return", app_url)),
            reminder_window_days: int_env("RENEWAL_REMINDER_DAYS", 3)?,
            signup_trial_days: int_env("SIGNUP_TRIAL_DAYS", 0)?,
            pending_signup_ttl_hours: int_env("PENDING_SIGNUP_TTL_HOURS", 24)?,
        })
    }
}

fn opt_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn int_env(name: &str, default: i64) -> BillingResult<i64> {
    match opt_env(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| BillingError::Config(format!("{} must be an integer, got '{}'", name, raw))),
        None => Ok(default),
    }
}

fn credential_pair(
    key_var: &str,
    secret_var: &str,
    url_var: &str,
    default_url: &str,
) -> BillingResult<Option<ProviderCredentials>> {
    match (opt_env(key_var), opt_env(secret_var)) {
        (Some(api_key), Some(webhook_secret)) => Ok(Some(ProviderCredentials {
            api_key,
            webhook_secret,
            api_url: std::env::var(url_var).unwrap_or_else(|_| default_url.to_string()),
        })),
        (None, None) => Ok(None),
        _ => Err(BillingError::Config(format!(
            "{} and {} must be set together",
            key_var, secret_var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_billing_env() {
        for var in [
            "STRIPE_SECRET_KEY",
            "STRIPE_WEBHOOK_SECRET",
            "CHECKOUT_SUCCESS_URL",
            "CHECKOUT_CANCEL_URL",
            "CHECKOUT_RETURN_URL",
            "FLUTTERWAVE_SECRET_KEY",
            "FLUTTERWAVE_WEBHOOK_SECRET",
            "FLUTTERWAVE_API_URL",
            "NOWPAYMENTS_API_KEY",
            "NOWPAYMENTS_IPN_SECRET",
            "NOWPAYMENTS_API_URL",
            "RENEWAL_REMINDER_DAYS",
            "SIGNUP_TRIAL_DAYS",
            "PENDING_SIGNUP_TTL_HOURS",
            "APP_BASE_URL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn no_providers_configured_is_valid() {
        clear_billing_env();
        let config = BillingConfig::from_env().unwrap();
        assert!(config.stripe.is_none());
        assert!(config.flutterwave.is_none());
        assert!(config.nowpayments.is_none());
        assert_eq!(config.reminder_window_days, 3);
        assert_eq!(config.signup_trial_days, 0);
    }

    #[test]
    #[serial]
    fn half_configured_provider_is_rejected() {
        clear_billing_env();
        std::env::set_var("FLUTTERWAVE_SECRET_KEY", "FLWSECK_TEST-abc");
        let err = BillingConfig::from_env().unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
        clear_billing_env();
    }

    #[test]
    #[serial]
    fn stripe_urls_derive_from_app_base() {
        clear_billing_env();
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_123");
        std::env::set_var("APP_BASE_URL", "https://app.tradelab.io");
        let config = BillingConfig::from_env().unwrap();
        let stripe = config.stripe.unwrap();
        assert_eq!(stripe.success_url, "https://app.tradelab.io/billing/success");
        assert_eq!(stripe.cancel_url, "https://app.tradelab.io/billing/cancelled");
        clear_billing_env();
    }

    #[test]
    #[serial]
    fn reminder_window_must_be_numeric() {
        clear_billing_env();
        std::env::set_var("RENEWAL_REMINDER_DAYS", "soon");
        let err = BillingConfig::from_env().unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
        clear_billing_env();
    }
}
