//! Stripe payment provider.
//!
//! Card payments run through hosted Checkout sessions. Each session carries
//! our `order_ref` as the client reference id plus subscription metadata, so
//! the webhook and the verify path can both route the payment back to the
//! subscription that owns it. The same `order_ref` is sent as the request's
//! idempotency key: a resubmitted create returns the original session
//! instead of opening a second payable one.

use async_trait::async_trait;
use std::collections::HashMap;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency, Expandable, RequestStrategy,
};
use tradelab_shared::PaymentProviderKind;

use crate::config::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::providers::{
    CreatedPayment, PaymentProvider, PaymentRequest, PaymentStatus, PaymentVerification,
};

pub struct StripeProvider {
    client: Client,
    config: StripeConfig,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(config.secret_key.clone()),
            config,
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> PaymentProviderKind {
        PaymentProviderKind::Stripe
    }

    async fn create_payment(&self, request: &PaymentRequest) -> BillingResult<CreatedPayment> {
        let currency = parse_currency(&request.currency)?;

        let mut metadata = HashMap::new();
        metadata.insert("order_ref".to_string(), request.order_ref.clone());
        metadata.insert(
            "subscription_id".to_string(),
            request.subscription_id.to_string(),
        );
        metadata.insert("user_id".to_string(), request.user_id.to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(&self.config.success_url);
        params.cancel_url = Some(&self.config.cancel_url);
        params.client_reference_id = Some(&request.order_ref);
        params.customer_email = request.customer_email.as_deref();
        params.metadata = Some(metadata);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(request.amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.description.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        // Stripe dedupes on the idempotency key, so retries that reuse an
        // open signup's order_ref get the original session back.
        let client = self
            .client
            .clone()
            .with_strategy(request_strategy(&request.order_ref));
        let session = CheckoutSession::create(&client, params)
            .await
            .map_err(map_stripe_error)?;

        tracing::info!(
            order_ref = %request.order_ref,
            session_id = %session.id,
            amount_cents = request.amount_cents,
            "Created Stripe checkout session"
        );

        Ok(CreatedPayment {
            provider: PaymentProviderKind::Stripe,
            provider_ref: session.id.to_string(),
            status: PaymentStatus::Pending,
            checkout_url: session.url,
            pay_address: None,
        })
    }

    async fn verify(&self, reference: &str) -> BillingResult<PaymentVerification> {
        let session_id: CheckoutSessionId = reference.parse().map_err(|_| {
            BillingError::InvalidRequest(format!("'{}' is not a checkout session id", reference))
        })?;

        let session = CheckoutSession::retrieve(&self.client, &session_id, &[])
            .await
            .map_err(map_stripe_error)?;

        let external_txn_id = match &session.payment_intent {
            Some(Expandable::Id(id)) => id.to_string(),
            Some(Expandable::Object(intent)) => intent.id.to_string(),
            None => session.id.to_string(),
        };

        Ok(PaymentVerification {
            status: map_session_status(session.payment_status),
            amount_cents: session.amount_total,
            currency: session
                .currency
                .map(|c| c.to_string().to_uppercase())
                .unwrap_or_else(|| "USD".to_string()),
            external_txn_id,
            order_ref: session.client_reference_id,
        })
    }
}

fn request_strategy(order_ref: &str) -> RequestStrategy {
    RequestStrategy::Idempotent(order_ref.to_string())
}

fn parse_currency(code: &str) -> BillingResult<Currency> {
    code.to_lowercase()
        .parse()
        .map_err(|_| BillingError::InvalidRequest(format!("unsupported currency '{}'", code)))
}

fn map_session_status(status: CheckoutSessionPaymentStatus) -> PaymentStatus {
    match status {
        CheckoutSessionPaymentStatus::Paid | CheckoutSessionPaymentStatus::NoPaymentRequired => {
            PaymentStatus::Succeeded
        }
        CheckoutSessionPaymentStatus::Unpaid => PaymentStatus::Pending,
    }
}

fn map_stripe_error(err: stripe::StripeError) -> BillingError {
    match err {
        stripe::StripeError::Stripe(request_error) => {
            let message = request_error
                .message
                .clone()
                .unwrap_or_else(|| "Stripe request failed".to_string());
            if matches!(request_error.error_type, stripe::ErrorType::Card) {
                BillingError::PaymentDeclined(message)
            } else if (400..500).contains(&request_error.http_status) {
                BillingError::InvalidRequest(message)
            } else {
                BillingError::ProviderUnavailable {
                    provider: PaymentProviderKind::Stripe,
                    detail: message,
                }
            }
        }
        other => BillingError::ProviderUnavailable {
            provider: PaymentProviderKind::Stripe,
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_create_keys_idempotency_on_order_ref() {
        assert!(matches!(
            request_strategy("ord_55aa"),
            RequestStrategy::Idempotent(key) if key == "ord_55aa"
        ));
    }

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!(parse_currency("USD").unwrap(), Currency::USD);
        assert_eq!(parse_currency("eur").unwrap(), Currency::EUR);
        assert!(parse_currency("doubloons").is_err());
    }

    #[test]
    fn unpaid_sessions_stay_pending() {
        assert_eq!(
            map_session_status(CheckoutSessionPaymentStatus::Unpaid),
            PaymentStatus::Pending
        );
        assert_eq!(
            map_session_status(CheckoutSessionPaymentStatus::Paid),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            map_session_status(CheckoutSessionPaymentStatus::NoPaymentRequired),
            PaymentStatus::Succeeded
        );
    }
}
