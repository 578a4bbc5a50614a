//! Outbound user notifications.
//!
//! Lifecycle transitions notify users on a best-effort basis. A send failure
//! is logged and reported as `false`, never as an error, so billing state is
//! never held hostage by the notification pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Template names the billing flows send under.
pub mod templates {
    pub const SUBSCRIPTION_ACTIVATED: &str = "subscription_activated";
    pub const PAYMENT_FAILED: &str = "payment_failed";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription_cancelled";
    pub const SUBSCRIPTION_EXPIRED: &str = "subscription_expired";
    pub const RENEWAL_REMINDER: &str = "renewal_reminder";
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver `template` to a user. Returns whether the send succeeded.
    async fn send(&self, user_id: Uuid, template: &str, data: &serde_json::Value) -> bool;
}

/// Posts notifications to the platform's internal notification endpoint,
/// which owns channel choice and rendering.
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, user_id: Uuid, template: &str, data: &serde_json::Value) -> bool {
        let body = json!({
            "user_id": user_id,
            "template": template,
            "data": data,
        });

        let result = self
            .client
            .post(&self.endpoint)
            .timeout(SEND_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(user_id = %user_id, template, "Notification delivered");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    user_id = %user_id,
                    template,
                    status = %response.status(),
                    "Notification endpoint rejected the send"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    template,
                    error = %e,
                    "Notification send failed"
                );
                false
            }
        }
    }
}

/// Sink used when no notification endpoint is configured. Reports success so
/// reminder markers still advance and sweeps do not retry forever.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSender for NoopNotifier {
    async fn send(&self, user_id: Uuid, template: &str, _data: &serde_json::Value) -> bool {
        tracing::debug!(
            user_id = %user_id,
            template,
            "Notification dropped; no endpoint configured"
        );
        true
    }
}

/// Build the configured sender: a webhook poster when `NOTIFY_WEBHOOK_URL`
/// is set, the no-op sink otherwise.
pub fn sender_from_env() -> Arc<dyn NotificationSender> {
    match std::env::var("NOTIFY_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let api_key = std::env::var("NOTIFY_API_KEY").unwrap_or_default();
            Arc::new(WebhookNotifier::new(url, api_key))
        }
        _ => Arc::new(NoopNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_template_and_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/notify")
            .match_header("x-api-key", "sekrit")
            .match_body(mockito::Matcher::PartialJson(json!({
                "template": "renewal_reminder",
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/notify", server.url()), "sekrit".into());
        let ok = notifier
            .send(
                Uuid::new_v4(),
                templates::RENEWAL_REMINDER,
                &json!({"days_left": 3}),
            )
            .await;

        assert!(ok);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn endpoint_failure_reports_false() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/notify")
            .with_status(500)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(format!("{}/notify", server.url()), String::new());
        let ok = notifier
            .send(Uuid::new_v4(), templates::PAYMENT_FAILED, &json!({}))
            .await;

        assert!(!ok);
    }

    #[tokio::test]
    async fn noop_sender_always_succeeds() {
        let ok = NoopNotifier
            .send(Uuid::new_v4(), templates::SUBSCRIPTION_EXPIRED, &json!({}))
            .await;
        assert!(ok);
    }
}
