//! Provider webhook receivers.
//!
//! These handlers take the raw request body as a `String` because signature
//! verification needs the exact bytes the provider signed; running the body
//! through a JSON extractor first would re-serialize it and break the HMAC.
//!
//! Response contract: every verified event is acknowledged with 200
//! `{"received": true}`, including replays the billing layer absorbed as
//! no-ops. 400 tells the provider the delivery itself is bad (signature,
//! shape) and must not be retried; 5xx asks it to redeliver later.

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};
use tradelab_billing::WebhookAck;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const FLUTTERWAVE_SIGNATURE_HEADER: &str = "verif-hash";
pub const NOWPAYMENTS_SIGNATURE_HEADER: &str = "x-nowpayments-sig";

fn signature_header<'a>(headers: &'a HeaderMap, name: &'static str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!(header = name, "Webhook missing signature header");
            ApiError::BadRequest(format!("Missing {} header", name))
        })
}

fn received(provider: &'static str, ack: WebhookAck) -> Json<Value> {
    match ack {
        WebhookAck::Processed => {
            tracing::info!(provider = provider, "Webhook processed");
        }
        WebhookAck::AlreadyProcessed => {
            tracing::info!(provider = provider, "Webhook replay absorbed");
        }
        WebhookAck::Ignored => {
            tracing::debug!(provider = provider, "Webhook event ignored");
        }
    }
    Json(json!({ "received": true }))
}

/// `POST /webhooks/stripe`
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = signature_header(&headers, STRIPE_SIGNATURE_HEADER)?;
    let ack = state.billing.webhooks.handle_stripe(&body, signature).await?;

    Ok(received("stripe", ack))
}

/// `POST /webhooks/flutterwave`
pub async fn flutterwave(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "Flutterwave webhook received");

    let signature = signature_header(&headers, FLUTTERWAVE_SIGNATURE_HEADER)?;
    let ack = state
        .billing
        .webhooks
        .handle_flutterwave(&body, signature)
        .await?;

    Ok(received("flutterwave", ack))
}

/// `POST /webhooks/nowpayments`
pub async fn nowpayments(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    tracing::info!(body_len = body.len(), "NOWPayments webhook received");

    let signature = signature_header(&headers, NOWPAYMENTS_SIGNATURE_HEADER)?;
    let ack = state
        .billing
        .webhooks
        .handle_nowpayments(&body, signature)
        .await?;

    Ok(received("nowpayments", ack))
}
