//! NOWPayments crypto payment provider.
//!
//! Payments are priced in fiat (`price_amount`/`price_currency`) and settled
//! in the crypto the customer picked. NOWPayments reports ids sometimes as
//! numbers and sometimes as strings depending on endpoint, so ids are
//! decoded tolerantly and normalized to strings everywhere.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tradelab_shared::PaymentProviderKind;

use crate::config::{ProviderCredentials, PROVIDER_TIMEOUT};
use crate::error::{BillingError, BillingResult};
use crate::providers::{
    CreatedPayment, PaymentProvider, PaymentRequest, PaymentStatus, PaymentVerification,
};

const DEFAULT_PAY_CURRENCY: &str = "btc";

pub struct NowpaymentsProvider {
    client: reqwest::Client,
    credentials: ProviderCredentials,
}

/// NOWPayments serializes `payment_id` as a number in some responses and a
/// string in IPN callbacks. Accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum IdValue {
    Num(i64),
    Str(String),
}

impl IdValue {
    pub(crate) fn into_string(self) -> String {
        match self {
            IdValue::Num(n) => n.to_string(),
            IdValue::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NowPayment {
    payment_id: IdValue,
    payment_status: String,
    #[serde(default)]
    pay_address: Option<String>,
    price_amount: f64,
    price_currency: String,
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NowEstimate {
    estimated_amount: f64,
}

impl NowpaymentsProvider {
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> BillingResult<T> {
        let url = format!("{}{}", self.credentials.api_url, path);
        let mut builder = self
            .client
            .request(method, &url)
            .header("x-api-key", &self.credentials.api_key)
            .timeout(PROVIDER_TIMEOUT);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "NOWPayments request failed");
            BillingError::ProviderUnavailable {
                provider: PaymentProviderKind::Nowpayments,
                detail: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %url, status = %status, body = %body, "NOWPayments returned an error");
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(BillingError::InvalidRequest(format!(
                    "NOWPayments rejected the request ({})",
                    status
                )));
            }
            return Err(BillingError::ProviderUnavailable {
                provider: PaymentProviderKind::Nowpayments,
                detail: format!("HTTP {}", status),
            });
        }

        response.json().await.map_err(|e| {
            BillingError::ProviderUnavailable {
                provider: PaymentProviderKind::Nowpayments,
                detail: format!("undecodable response: {}", e),
            }
        })
    }
}

#[async_trait]
impl PaymentProvider for NowpaymentsProvider {
    fn kind(&self) -> PaymentProviderKind {
        PaymentProviderKind::Nowpayments
    }

    async fn create_payment(&self, request: &PaymentRequest) -> BillingResult<CreatedPayment> {
        let pay_currency = request
            .pay_currency
            .as_deref()
            .unwrap_or(DEFAULT_PAY_CURRENCY);

        let body = serde_json::json!({
            "price_amount": request.amount_cents as f64 / 100.0,
            "price_currency": request.currency.to_lowercase(),
            "pay_currency": pay_currency,
            "order_id": request.order_ref,
            "order_description": request.description,
        });

        let payment: NowPayment = self.request(Method::POST, "/payment", Some(&body)).await?;
        let payment_id = payment.payment_id.into_string();

        tracing::info!(
            order_ref = %request.order_ref,
            payment_id = %payment_id,
            pay_currency = %pay_currency,
            "Created NOWPayments payment"
        );

        Ok(CreatedPayment {
            provider: PaymentProviderKind::Nowpayments,
            provider_ref: payment_id,
            status: map_payment_status(&payment.payment_status),
            checkout_url: None,
            pay_address: payment.pay_address,
        })
    }

    async fn verify(&self, reference: &str) -> BillingResult<PaymentVerification> {
        let path = format!("/payment/{}", reference);
        let payment: NowPayment = self.request(Method::GET, &path, None).await?;

        Ok(PaymentVerification {
            status: map_payment_status(&payment.payment_status),
            amount_cents: Some((payment.price_amount * 100.0).round() as i64),
            currency: payment.price_currency.to_uppercase(),
            external_txn_id: payment.payment_id.into_string(),
            order_ref: payment.order_id,
        })
    }

    async fn estimate(&self, amount_cents: i64, from: &str, to: &str) -> BillingResult<f64> {
        let path = format!(
            "/estimate?amount={}&currency_from={}&currency_to={}",
            amount_cents as f64 / 100.0,
            from.to_lowercase(),
            to.to_lowercase()
        );
        let estimate: NowEstimate = self.request(Method::GET, &path, None).await?;
        Ok(estimate.estimated_amount)
    }
}

pub(crate) fn map_payment_status(status: &str) -> PaymentStatus {
    match status {
        "finished" | "confirmed" => PaymentStatus::Succeeded,
        "failed" | "refunded" | "expired" => PaymentStatus::Failed,
        // waiting, confirming, sending, partially_paid
        _ => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn provider(server: &mockito::ServerGuard) -> NowpaymentsProvider {
        NowpaymentsProvider::new(ProviderCredentials {
            api_key: "NP-KEY".to_string(),
            webhook_secret: "ipn-secret".to_string(),
            api_url: server.url(),
        })
    }

    fn payment_request() -> PaymentRequest {
        PaymentRequest {
            order_ref: "ord_crypto1".to_string(),
            amount_cents: 9900,
            currency: "USD".to_string(),
            description: "Elite plan (yearly)".to_string(),
            customer_email: None,
            pay_currency: Some("eth".to_string()),
            subscription_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn create_payment_returns_deposit_address() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/payment")
            .match_header("x-api-key", "NP-KEY")
            .with_status(201)
            .with_body(
                serde_json::json!({
                    "payment_id": 5077125051i64,
                    "payment_status": "waiting",
                    "pay_address": "0x1eEe7E3B5dBBdF501b4endeAd",
                    "price_amount": 99.0,
                    "price_currency": "usd",
                    "pay_amount": 0.0312,
                    "pay_currency": "eth",
                    "order_id": "ord_crypto1"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let created = provider(&server)
            .create_payment(&payment_request())
            .await
            .unwrap();

        assert_eq!(created.provider_ref, "5077125051");
        assert_eq!(created.status, PaymentStatus::Pending);
        assert!(created.checkout_url.is_none());
        assert_eq!(
            created.pay_address.as_deref(),
            Some("0x1eEe7E3B5dBBdF501b4endeAd")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn verify_handles_string_payment_ids() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payment/5077125051")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "payment_id": "5077125051",
                    "payment_status": "finished",
                    "price_amount": 99.0,
                    "price_currency": "usd",
                    "order_id": "ord_crypto1"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let verification = provider(&server).verify("5077125051").await.unwrap();

        assert_eq!(verification.status, PaymentStatus::Succeeded);
        assert_eq!(verification.amount_cents, Some(9900));
        assert_eq!(verification.currency, "USD");
        assert_eq!(verification.external_txn_id, "5077125051");
    }

    #[tokio::test]
    async fn estimate_fetches_conversion_rate() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/estimate?amount=99&currency_from=usd&currency_to=btc")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "currency_from": "usd",
                    "amount_from": 99.0,
                    "currency_to": "btc",
                    "estimated_amount": 0.00154
                })
                .to_string(),
            )
            .create_async()
            .await;

        let amount = provider(&server).estimate(9900, "usd", "btc").await.unwrap();
        assert!((amount - 0.00154).abs() < f64::EPSILON);
    }

    #[test]
    fn payment_status_mapping_covers_lifecycle() {
        assert_eq!(map_payment_status("waiting"), PaymentStatus::Pending);
        assert_eq!(map_payment_status("confirming"), PaymentStatus::Pending);
        assert_eq!(map_payment_status("partially_paid"), PaymentStatus::Pending);
        assert_eq!(map_payment_status("confirmed"), PaymentStatus::Succeeded);
        assert_eq!(map_payment_status("finished"), PaymentStatus::Succeeded);
        assert_eq!(map_payment_status("failed"), PaymentStatus::Failed);
        assert_eq!(map_payment_status("expired"), PaymentStatus::Failed);
        assert_eq!(map_payment_status("refunded"), PaymentStatus::Failed);
    }
}
