//! Provider webhook receivers.
//!
//! Each provider posts raw JSON plus a signature header. Verification is
//! HMAC under the provider's shared secret, compared in constant time; a
//! mismatch is fatal and nothing is parsed. Verified payloads are normalized
//! into one internal event shape before the lifecycle service sees them, so
//! provider wire formats never leak past this module.
//!
//! Receivers are replay-safe end to end: duplicate deliveries resolve to
//! `AlreadyProcessed`, events for unknown references are logged and ignored,
//! and both acknowledge with 200 upstream.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Sha256, Sha512};
use sqlx::PgPool;
use stripe::{CheckoutSessionPaymentStatus, Event, EventObject, EventType, Expandable, Webhook};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tradelab_shared::PaymentProviderKind;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::flutterwave;
use crate::notifications::{templates, NotificationSender};
use crate::nowpayments::{self, IdValue};
use crate::providers::PaymentStatus;
use crate::store::SubscriptionStore;
use crate::subscriptions::{
    ActivationOutcome, PaymentDetails, SubscriptionService, TransitionOutcome,
};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Seconds a Stripe signature timestamp may differ from our clock.
const STRIPE_TOLERANCE_SECS: i64 = 300;

/// How a normalized event names its subscription. Providers that carry our
/// metadata give the id directly; the rest echo the order_ref we created the
/// payment under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRef {
    Id(Uuid),
    OrderRef(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
}

/// One provider event, already verified and stripped of wire format.
#[derive(Debug)]
pub struct PaymentEvent {
    pub provider: PaymentProviderKind,
    pub kind: PaymentEventKind,
    pub reference: SubscriptionRef,
    pub transaction_id: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    /// Masked instrument data when the provider includes it (Flutterwave
    /// sends the card summary in the charge event). Recorded against the
    /// user on successful payments so `/api/payment-methods` has rows.
    pub masked_method: Option<serde_json::Value>,
}

/// What handling a verified webhook amounted to. Every variant is
/// acknowledged with 200 upstream.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookAck {
    Processed,
    AlreadyProcessed,
    Ignored,
}

pub struct WebhookHandler {
    config: BillingConfig,
    subscriptions: SubscriptionService,
    store: SubscriptionStore,
    notifier: Arc<dyn NotificationSender>,
}

impl WebhookHandler {
    pub fn new(config: BillingConfig, pool: PgPool, notifier: Arc<dyn NotificationSender>) -> Self {
        Self {
            config,
            subscriptions: SubscriptionService::new(pool.clone()),
            store: SubscriptionStore::new(pool),
            notifier,
        }
    }

    // ========================================================================
    // Provider entry points
    // ========================================================================

    pub async fn handle_stripe(&self, payload: &str, signature: &str) -> BillingResult<WebhookAck> {
        let secret = &self
            .config
            .stripe
            .as_ref()
            .ok_or_else(|| BillingError::Config("Stripe webhooks are not configured".to_string()))?
            .webhook_secret;

        // The SDK path verifies and parses in one step. It rejects payloads
        // from API versions newer than it knows, so fall back to checking the
        // signature by hand and parsing the event directly.
        let event = match Webhook::construct_event(payload, signature, secret) {
            Ok(event) => event,
            Err(sdk_err) => {
                tracing::debug!(
                    stripe_error = %sdk_err,
                    "SDK webhook verification failed; trying manual path"
                );
                verify_stripe_signature(payload, signature, secret)?;
                match serde_json::from_str::<Event>(payload) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Verified Stripe payload failed to parse; acknowledging");
                        return Ok(WebhookAck::Ignored);
                    }
                }
            }
        };

        match normalize_stripe_event(&event) {
            Some(payment_event) => self.apply(payment_event).await,
            None => {
                tracing::info!(event_type = %event.type_, "Unhandled Stripe event type");
                Ok(WebhookAck::Ignored)
            }
        }
    }

    pub async fn handle_flutterwave(
        &self,
        payload: &str,
        signature: &str,
    ) -> BillingResult<WebhookAck> {
        let secret = &self
            .config
            .flutterwave
            .as_ref()
            .ok_or_else(|| {
                BillingError::Config("Flutterwave webhooks are not configured".to_string())
            })?
            .webhook_secret;

        verify_flutterwave_signature(payload, signature, secret)?;

        match parse_flutterwave_event(payload) {
            Some(event) => self.apply(event).await,
            None => Ok(WebhookAck::Ignored),
        }
    }

    pub async fn handle_nowpayments(
        &self,
        payload: &str,
        signature: &str,
    ) -> BillingResult<WebhookAck> {
        let secret = &self
            .config
            .nowpayments
            .as_ref()
            .ok_or_else(|| {
                BillingError::Config("NOWPayments webhooks are not configured".to_string())
            })?
            .webhook_secret;

        verify_nowpayments_signature(payload, signature, secret)?;

        match parse_nowpayments_event(payload) {
            Some(event) => self.apply(event).await,
            None => Ok(WebhookAck::Ignored),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Route a normalized event into the lifecycle service.
    async fn apply(&self, event: PaymentEvent) -> BillingResult<WebhookAck> {
        let subscription_id = match self.resolve_reference(&event.reference).await? {
            Some(id) => id,
            None => {
                tracing::warn!(
                    provider = %event.provider,
                    reference = ?event.reference,
                    transaction_id = %event.transaction_id,
                    "Webhook references an unknown subscription; acknowledging without change"
                );
                return Ok(WebhookAck::Ignored);
            }
        };

        let payment = PaymentDetails {
            transaction_id: event.transaction_id,
            provider: event.provider,
            amount_cents: event.amount_cents,
            currency: event.currency,
        };

        match event.kind {
            PaymentEventKind::Succeeded => {
                self.apply_success(subscription_id, payment, event.masked_method)
                    .await
            }
            PaymentEventKind::Failed => self.apply_failure(subscription_id, payment).await,
        }
    }

    async fn resolve_reference(&self, reference: &SubscriptionRef) -> BillingResult<Option<Uuid>> {
        match reference {
            SubscriptionRef::Id(id) => Ok(Some(*id)),
            SubscriptionRef::OrderRef(order_ref) => Ok(self
                .store
                .find_pending_by_order_ref(order_ref)
                .await?
                .map(|pending| pending.subscription_id)),
        }
    }

    async fn apply_success(
        &self,
        subscription_id: Uuid,
        payment: PaymentDetails,
        masked_method: Option<serde_json::Value>,
    ) -> BillingResult<WebhookAck> {
        let subscription = match self.store.get_subscription(subscription_id).await {
            Ok(subscription) => subscription,
            Err(BillingError::NotFound(what)) => {
                tracing::warn!(%what, "Payment webhook for an unknown subscription");
                return Ok(WebhookAck::Ignored);
            }
            Err(e) => return Err(e),
        };
        let plan = self.store.get_plan(subscription.plan_id).await?;
        let provider = payment.provider;

        match self
            .subscriptions
            .activate(subscription_id, plan.period_length_days(), payment)
            .await?
        {
            ActivationOutcome::Applied(updated) => {
                // Best effort: a failure to save the card summary must not
                // make the provider redeliver an already-applied payment.
                if let Some(masked) = masked_method {
                    if let Err(e) = self
                        .store
                        .record_payment_method(updated.user_id, provider, masked)
                        .await
                    {
                        tracing::warn!(error = %e, user_id = %updated.user_id, "Could not record payment method");
                    }
                }

                self.notifier
                    .send(
                        updated.user_id,
                        templates::SUBSCRIPTION_ACTIVATED,
                        &serde_json::json!({
                            "plan": plan.display_name,
                            "period_end": updated.current_period_end.to_string(),
                        }),
                    )
                    .await;
                Ok(WebhookAck::Processed)
            }
            ActivationOutcome::AlreadyProcessed => Ok(WebhookAck::AlreadyProcessed),
            ActivationOutcome::Skipped(_) => Ok(WebhookAck::Ignored),
        }
    }

    async fn apply_failure(
        &self,
        subscription_id: Uuid,
        payment: PaymentDetails,
    ) -> BillingResult<WebhookAck> {
        match self
            .subscriptions
            .mark_past_due(subscription_id, Some(payment))
            .await
        {
            Ok(TransitionOutcome::Applied) => {
                let subscription = self.store.get_subscription(subscription_id).await?;
                self.notifier
                    .send(
                        subscription.user_id,
                        templates::PAYMENT_FAILED,
                        &serde_json::json!({
                            "grace_until": subscription.current_period_end.to_string(),
                        }),
                    )
                    .await;
                Ok(WebhookAck::Processed)
            }
            Ok(TransitionOutcome::AlreadyProcessed) => Ok(WebhookAck::AlreadyProcessed),
            Ok(TransitionOutcome::Skipped(_)) => Ok(WebhookAck::Ignored),
            Err(BillingError::NotFound(what)) => {
                tracing::warn!(%what, "Failed-payment webhook for an unknown subscription");
                Ok(WebhookAck::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Signature verification
// ============================================================================

/// Manual Stripe signature check. The header carries `t=<unix>,v1=<hex>`
/// pairs; the signed message is `"{t}.{payload}"` under HMAC-SHA256 with the
/// endpoint secret as the key.
pub(crate) fn verify_stripe_signature(
    payload: &str,
    signature: &str,
    secret: &str,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<String> = Vec::new();

    for part in signature.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => timestamp = value.parse().ok(),
            (Some("v1"), Some(value)) => candidates.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::SignatureInvalid)?;
    if candidates.is_empty() {
        return Err(BillingError::SignatureInvalid);
    }

    let age = (OffsetDateTime::now_utc().unix_timestamp() - timestamp).abs();
    if age > STRIPE_TOLERANCE_SECS {
        tracing::warn!(age_secs = age, "Stripe signature timestamp outside tolerance");
        return Err(BillingError::SignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    let expected = hmac_sha256_hex(secret.as_bytes(), signed_payload.as_bytes())?;

    // Secret rotation can put several v1 entries in one header.
    if candidates
        .iter()
        .any(|candidate| constant_time_eq(candidate, &expected))
    {
        Ok(())
    } else {
        Err(BillingError::SignatureInvalid)
    }
}

/// Flutterwave signs the raw body with HMAC-SHA256 under the webhook secret
/// and sends the hex digest in the `verif-hash` header.
pub(crate) fn verify_flutterwave_signature(
    payload: &str,
    signature: &str,
    secret: &str,
) -> BillingResult<()> {
    let expected = hmac_sha256_hex(secret.as_bytes(), payload.as_bytes())?;
    if constant_time_eq(signature.trim(), &expected) {
        Ok(())
    } else {
        Err(BillingError::SignatureInvalid)
    }
}

/// NOWPayments signs the IPN body re-serialized with sorted keys, HMAC-SHA512
/// under the IPN secret, hex digest in `x-nowpayments-sig`.
pub(crate) fn verify_nowpayments_signature(
    payload: &str,
    signature: &str,
    secret: &str,
) -> BillingResult<()> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|_| BillingError::SignatureInvalid)?;
    // serde_json maps iterate in key order, which is the provider's canonical
    // form for the signed message.
    let canonical = serde_json::to_string(&value).map_err(|_| BillingError::SignatureInvalid)?;

    let expected = hmac_sha512_hex(secret.as_bytes(), canonical.as_bytes())?;
    if constant_time_eq(signature.trim(), &expected) {
        Ok(())
    } else {
        Err(BillingError::SignatureInvalid)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| BillingError::Internal("HMAC key setup failed".to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn hmac_sha512_hex(key: &[u8], message: &[u8]) -> BillingResult<String> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|_| BillingError::Internal("HMAC key setup failed".to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// ============================================================================
// Event normalization
// ============================================================================

fn normalize_stripe_event(event: &Event) -> Option<PaymentEvent> {
    let kind = match event.type_ {
        EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded => {
            PaymentEventKind::Succeeded
        }
        EventType::CheckoutSessionAsyncPaymentFailed => PaymentEventKind::Failed,
        _ => return None,
    };

    let EventObject::CheckoutSession(session) = &event.data.object else {
        return None;
    };

    // A completed session on a delayed-capture method is not money yet; the
    // async_payment_succeeded event follows when it settles.
    if event.type_ == EventType::CheckoutSessionCompleted
        && session.payment_status == CheckoutSessionPaymentStatus::Unpaid
    {
        return None;
    }

    let reference = session
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("subscription_id"))
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .map(SubscriptionRef::Id)
        .or_else(|| {
            session
                .client_reference_id
                .clone()
                .map(SubscriptionRef::OrderRef)
        })?;

    let transaction_id = match &session.payment_intent {
        Some(Expandable::Id(id)) => id.to_string(),
        Some(Expandable::Object(intent)) => intent.id.to_string(),
        None => session.id.to_string(),
    };

    Some(PaymentEvent {
        provider: PaymentProviderKind::Stripe,
        kind,
        reference,
        transaction_id,
        amount_cents: session.amount_total,
        currency: session.currency.map(|c| c.to_string().to_uppercase()),
        // The checkout.session events carry no card summary; retrieving the
        // payment intent for one is not worth a provider round trip here.
        masked_method: None,
    })
}

#[derive(Debug, Deserialize)]
struct FlwWebhook {
    event: String,
    data: FlwWebhookData,
}

#[derive(Debug, Deserialize)]
struct FlwWebhookData {
    id: i64,
    tx_ref: String,
    amount: f64,
    currency: Option<String>,
    status: String,
    meta: Option<serde_json::Value>,
    card: Option<FlwCard>,
}

#[derive(Debug, Deserialize)]
struct FlwCard {
    last_4digits: String,
    #[serde(rename = "type")]
    card_type: Option<String>,
    expiry: Option<String>,
}

impl FlwCard {
    fn masked(&self) -> serde_json::Value {
        serde_json::json!({
            "brand": self.card_type,
            "last4": self.last_4digits,
            "expiry": self.expiry,
        })
    }
}

fn parse_flutterwave_event(payload: &str) -> Option<PaymentEvent> {
    let webhook: FlwWebhook = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable Flutterwave webhook; acknowledging");
            return None;
        }
    };

    if webhook.event != "charge.completed" {
        tracing::info!(event = %webhook.event, "Unhandled Flutterwave event type");
        return None;
    }

    let kind = match flutterwave::map_charge_status(&webhook.data.status) {
        PaymentStatus::Succeeded => PaymentEventKind::Succeeded,
        PaymentStatus::Failed => PaymentEventKind::Failed,
        PaymentStatus::Pending => return None,
    };

    let reference = webhook
        .data
        .meta
        .as_ref()
        .and_then(|meta| meta.get("subscription_id"))
        .and_then(|raw| raw.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .map(SubscriptionRef::Id)
        .unwrap_or_else(|| SubscriptionRef::OrderRef(webhook.data.tx_ref.clone()));

    Some(PaymentEvent {
        provider: PaymentProviderKind::Flutterwave,
        kind,
        reference,
        transaction_id: webhook.data.id.to_string(),
        amount_cents: Some((webhook.data.amount * 100.0).round() as i64),
        currency: webhook.data.currency,
        masked_method: webhook.data.card.as_ref().map(FlwCard::masked),
    })
}

#[derive(Debug, Deserialize)]
struct NowIpn {
    payment_id: IdValue,
    payment_status: String,
    order_id: Option<String>,
    price_amount: Option<f64>,
    price_currency: Option<String>,
}

fn parse_nowpayments_event(payload: &str) -> Option<PaymentEvent> {
    let ipn: NowIpn = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable NOWPayments IPN; acknowledging");
            return None;
        }
    };

    let kind = match nowpayments::map_payment_status(&ipn.payment_status) {
        PaymentStatus::Succeeded => PaymentEventKind::Succeeded,
        PaymentStatus::Failed => PaymentEventKind::Failed,
        // waiting, confirming and friends resolve later; nothing to apply yet
        PaymentStatus::Pending => return None,
    };

    let Some(order_id) = ipn.order_id else {
        tracing::warn!(payment_status = %ipn.payment_status, "NOWPayments IPN lacks an order id");
        return None;
    };

    Some(PaymentEvent {
        provider: PaymentProviderKind::Nowpayments,
        kind,
        reference: SubscriptionRef::OrderRef(order_id),
        transaction_id: ipn.payment_id.into_string(),
        amount_cents: ipn.price_amount.map(|a| (a * 100.0).round() as i64),
        currency: ipn.price_currency.map(|c| c.to_uppercase()),
        masked_method: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    fn sign_stripe(payload: &str, timestamp: i64, secret: &str) -> String {
        let signed = format!("{}.{}", timestamp, payload);
        let digest = hmac_sha256_hex(secret.as_bytes(), signed.as_bytes()).unwrap();
        format!("t={},v1={}", timestamp, digest)
    }

    // ========================================================================
    // Stripe signature tests
    // ========================================================================

    #[test]
    fn stripe_signature_accepts_fresh_valid_header() {
        let payload = r#"{"id":"evt_1"}"#;
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign_stripe(payload, ts, SECRET);
        assert!(verify_stripe_signature(payload, &header, SECRET).is_ok());
    }

    #[test]
    fn stripe_signature_rejects_tampered_payload() {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign_stripe(r#"{"id":"evt_1"}"#, ts, SECRET);
        let err = verify_stripe_signature(r#"{"id":"evt_2"}"#, &header, SECRET).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[test]
    fn stripe_signature_rejects_stale_timestamp() {
        let payload = r#"{"id":"evt_1"}"#;
        let ts = OffsetDateTime::now_utc().unix_timestamp() - STRIPE_TOLERANCE_SECS - 30;
        let header = sign_stripe(payload, ts, SECRET);
        let err = verify_stripe_signature(payload, &header, SECRET).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[test]
    fn stripe_signature_accepts_any_matching_v1() {
        let payload = r#"{"id":"evt_1"}"#;
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let digest =
            hmac_sha256_hex(SECRET.as_bytes(), format!("{}.{}", ts, payload).as_bytes()).unwrap();
        let header = format!("t={},v1={},v1={}", ts, "0".repeat(64), digest);
        assert!(verify_stripe_signature(payload, &header, SECRET).is_ok());
    }

    #[test]
    fn stripe_signature_rejects_header_without_timestamp() {
        let err =
            verify_stripe_signature(r#"{"id":"evt_1"}"#, "v1=deadbeef", SECRET).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    // ========================================================================
    // Flutterwave signature tests
    // ========================================================================

    #[test]
    fn flutterwave_signature_roundtrip() {
        let payload = r#"{"event":"charge.completed"}"#;
        let good = hmac_sha256_hex(b"fw-secret", payload.as_bytes()).unwrap();
        assert!(verify_flutterwave_signature(payload, &good, "fw-secret").is_ok());
        assert!(matches!(
            verify_flutterwave_signature(payload, &good, "other-secret").unwrap_err(),
            BillingError::SignatureInvalid
        ));
    }

    // ========================================================================
    // NOWPayments signature tests
    // ========================================================================

    #[test]
    fn nowpayments_signature_is_key_order_independent() {
        let secret = "ipn-secret";
        let sig = hmac_sha512_hex(secret.as_bytes(), br#"{"a":1,"b":2}"#).unwrap();
        assert!(verify_nowpayments_signature(r#"{"b":2,"a":1}"#, &sig, secret).is_ok());
    }

    #[test]
    fn nowpayments_signature_rejects_wrong_digest() {
        let sig = hmac_sha512_hex(b"ipn-secret", b"{}").unwrap();
        let err = verify_nowpayments_signature(r#"{"a":1}"#, &sig, "ipn-secret").unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    // ========================================================================
    // Normalization tests
    // ========================================================================

    #[test]
    fn flutterwave_success_normalizes_to_order_ref() {
        let payload = json!({
            "event": "charge.completed",
            "data": {
                "id": 285959875,
                "tx_ref": "ord_abc123",
                "amount": 49.99,
                "currency": "USD",
                "status": "successful",
            }
        })
        .to_string();

        let event = parse_flutterwave_event(&payload).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(
            event.reference,
            SubscriptionRef::OrderRef("ord_abc123".into())
        );
        assert_eq!(event.transaction_id, "285959875");
        assert_eq!(event.amount_cents, Some(4999));
    }

    #[test]
    fn flutterwave_meta_subscription_id_wins_over_tx_ref() {
        let id = Uuid::new_v4();
        let payload = json!({
            "event": "charge.completed",
            "data": {
                "id": 1,
                "tx_ref": "ord_xyz",
                "amount": 10.0,
                "currency": "NGN",
                "status": "failed",
                "meta": { "subscription_id": id.to_string() },
            }
        })
        .to_string();

        let event = parse_flutterwave_event(&payload).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Failed);
        assert_eq!(event.reference, SubscriptionRef::Id(id));
    }

    #[test]
    fn flutterwave_other_events_are_ignored() {
        let payload = json!({
            "event": "transfer.completed",
            "data": { "id": 2, "tx_ref": "t", "amount": 1.0, "status": "successful" }
        })
        .to_string();
        assert!(parse_flutterwave_event(&payload).is_none());
    }

    #[test]
    fn flutterwave_card_summary_becomes_masked_method() {
        let payload = json!({
            "event": "charge.completed",
            "data": {
                "id": 3,
                "tx_ref": "ord_card",
                "amount": 29.99,
                "currency": "USD",
                "status": "successful",
                "card": {
                    "first_6digits": "553188",
                    "last_4digits": "2950",
                    "type": "MASTERCARD",
                    "expiry": "09/27",
                }
            }
        })
        .to_string();

        let event = parse_flutterwave_event(&payload).unwrap();
        let masked = event.masked_method.unwrap();
        assert_eq!(masked["last4"], "2950");
        assert_eq!(masked["brand"], "MASTERCARD");
        // The full PAN must never survive normalization
        assert!(masked.get("first_6digits").is_none());

        let bare = json!({
            "event": "charge.completed",
            "data": { "id": 4, "tx_ref": "ord_nocard", "amount": 5.0, "status": "successful" }
        })
        .to_string();
        assert!(parse_flutterwave_event(&bare)
            .unwrap()
            .masked_method
            .is_none());
    }

    #[test]
    fn nowpayments_interim_statuses_are_ignored() {
        for status in ["waiting", "confirming", "sending", "partially_paid"] {
            let payload = json!({
                "payment_id": 4945313,
                "payment_status": status,
                "order_id": "ord_abc",
                "price_amount": 29.99,
                "price_currency": "usd",
            })
            .to_string();
            assert!(parse_nowpayments_event(&payload).is_none(), "{}", status);
        }
    }

    #[test]
    fn nowpayments_finished_normalizes() {
        let payload = json!({
            "payment_id": "4945313",
            "payment_status": "finished",
            "order_id": "ord_abc",
            "price_amount": 29.99,
            "price_currency": "usd",
        })
        .to_string();

        let event = parse_nowpayments_event(&payload).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(event.reference, SubscriptionRef::OrderRef("ord_abc".into()));
        assert_eq!(event.transaction_id, "4945313");
        assert_eq!(event.amount_cents, Some(2999));
        assert_eq!(event.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn nowpayments_ipn_without_order_id_is_ignored() {
        let payload = json!({
            "payment_id": 7,
            "payment_status": "finished",
        })
        .to_string();
        assert!(parse_nowpayments_event(&payload).is_none());
    }
}
