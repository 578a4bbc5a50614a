//! Flutterwave payment provider.
//!
//! Uses the v3 REST API: `POST /payments` returns a hosted payment link, and
//! `GET /transactions/verify_by_reference` looks a charge up by the `tx_ref`
//! we generated, so verification works even before the webhook has told us
//! Flutterwave's own transaction id.

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

pub struct FlutterwaveProvider {
    client: reqwest::Client,
    credentials: ProviderCredentials,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct FlwEnvelope<T> {
    status: String,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FlwPaymentLink {
    link: String,
}

#[derive(Debug, Deserialize)]
struct FlwTransaction {
    id: i64,
    tx_ref: String,
    amount: f64,
    currency: String,
    status: String,
}

impl FlutterwaveProvider {
    pub fn new(credentials: ProviderCredentials, redirect_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            redirect_url,
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
            .bearer_auth(&self.credentials.api_key)
            .timeout(PROVIDER_TIMEOUT);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Flutterwave request failed");
            BillingError::ProviderUnavailable {
                provider: PaymentProviderKind::Flutterwave,
                detail: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %url, status = %status, body = %body, "Flutterwave returned an error");
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(BillingError::InvalidRequest(format!(
                    "Flutterwave rejected the request ({})",
                    status
                )));
            }
            return Err(BillingError::ProviderUnavailable {
                provider: PaymentProviderKind::Flutterwave,
                detail: format!("HTTP {}", status),
            });
        }

        let envelope: FlwEnvelope<T> = response.json().await.map_err(|e| {
            BillingError::ProviderUnavailable {
                provider: PaymentProviderKind::Flutterwave,
                detail: format!("undecodable response: {}", e),
            }
        })?;

        if envelope.status != "success" {
            return Err(BillingError::InvalidRequest(
                envelope
                    .message
                    .unwrap_or_else(|| "Flutterwave reported failure".to_string()),
            ));
        }

        envelope.data.ok_or_else(|| BillingError::ProviderUnavailable {
            provider: PaymentProviderKind::Flutterwave,
            detail: "response missing data".to_string(),
        })
    }
}

#[async_trait]
impl PaymentProvider for FlutterwaveProvider {
    fn kind(&self) -> PaymentProviderKind {
        PaymentProviderKind::Flutterwave
    }

    async fn create_payment(&self, request: &PaymentRequest) -> BillingResult<CreatedPayment> {
        let body = serde_json::json!({
            "tx_ref": request.order_ref,
            "amount": format!("{:.2}", request.amount_cents as f64 / 100.0),
            "currency": request.currency,
            "redirect_url": self.redirect_url,
            "customer": {
                "email": request.customer_email.as_deref().unwrap_or("unknown@tradelab.io"),
            },
            "customizations": {
                "title": request.description,
            },
            "meta": {
                "subscription_id": request.subscription_id.to_string(),
                "user_id": request.user_id.to_string(),
            },
        });

        let link: FlwPaymentLink = self
            .request(Method::POST, "/payments", Some(&body))
            .await?;

        tracing::info!(
            order_ref = %request.order_ref,
            amount_cents = request.amount_cents,
            "Created Flutterwave payment link"
        );

        Ok(CreatedPayment {
            provider: PaymentProviderKind::Flutterwave,
            provider_ref: request.order_ref.clone(),
            status: PaymentStatus::Pending,
            checkout_url: Some(link.link),
            pay_address: None,
        })
    }

    async fn verify(&self, reference: &str) -> BillingResult<PaymentVerification> {
        let path = format!("/transactions/verify_by_reference?tx_ref={}", reference);
        let txn: FlwTransaction = self.request(Method::GET, &path, None).await?;

        Ok(PaymentVerification {
            status: map_charge_status(&txn.status),
            amount_cents: Some((txn.amount * 100.0).round() as i64),
            currency: txn.currency,
            external_txn_id: txn.id.to_string(),
            order_ref: Some(txn.tx_ref),
        })
    }
}

pub(crate) fn map_charge_status(status: &str) -> PaymentStatus {
    match status {
        "successful" => PaymentStatus::Succeeded,
        "failed" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn provider(server: &mockito::ServerGuard) -> FlutterwaveProvider {
        FlutterwaveProvider::new(
            ProviderCredentials {
                api_key: "FLWSECK_TEST-key".to_string(),
                webhook_secret: "hash".to_string(),
                api_url: server.url(),
            },
            "https://app.tradelab.io/billing/return".to_string(),
        )
    }

    fn payment_request() -> PaymentRequest {
        PaymentRequest {
            order_ref: "ord_abc123".to_string(),
            amount_cents: 2999,
            currency: "USD".to_string(),
            description: "Pro plan (monthly)".to_string(),
            customer_email: Some("trader@example.com".to_string()),
            pay_currency: None,
            subscription_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn create_payment_returns_hosted_link() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/payments")
            .match_header("authorization", "Bearer FLWSECK_TEST-key")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "status": "success",
                    "message": "Hosted Link",
                    "data": { "link": "https://checkout.flutterwave.com/v3/hosted/pay/xyz" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let created = provider(&server)
            .create_payment(&payment_request())
            .await
            .unwrap();

        assert_eq!(created.provider_ref, "ord_abc123");
        assert_eq!(created.status, PaymentStatus::Pending);
        assert_eq!(
            created.checkout_url.as_deref(),
            Some("https://checkout.flutterwave.com/v3/hosted/pay/xyz")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn verify_converts_amount_to_cents() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "GET",
                "/transactions/verify_by_reference?tx_ref=ord_abc123",
            )
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "status": "success",
                    "message": "Transaction fetched",
                    "data": {
                        "id": 8812734,
                        "tx_ref": "ord_abc123",
                        "amount": 29.99,
                        "currency": "USD",
                        "status": "successful"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let verification = provider(&server).verify("ord_abc123").await.unwrap();

        assert_eq!(verification.status, PaymentStatus::Succeeded);
        assert_eq!(verification.amount_cents, Some(2999));
        assert_eq!(verification.external_txn_id, "8812734");
        assert_eq!(verification.order_ref.as_deref(), Some("ord_abc123"));
    }

    #[tokio::test]
    async fn server_errors_surface_as_provider_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payments")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let err = provider(&server)
            .create_payment(&payment_request())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(err, BillingError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/payments")
            .with_status(400)
            .with_body(r#"{"status":"error","message":"Invalid currency"}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .create_payment(&payment_request())
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(matches!(err, BillingError::InvalidRequest(_)));
    }

    #[test]
    fn charge_status_mapping() {
        assert_eq!(map_charge_status("successful"), PaymentStatus::Succeeded);
        assert_eq!(map_charge_status("failed"), PaymentStatus::Failed);
        assert_eq!(map_charge_status("pending"), PaymentStatus::Pending);
    }
}
