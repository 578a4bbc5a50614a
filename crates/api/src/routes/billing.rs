//! Subscription and billing routes for authenticated users.
//!
//! Caller identity comes from the `AuthUser` extension inserted by the
//! identity middleware; handlers never read headers themselves.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tradelab_billing::{CheckoutStart, VerifyResult};
use tradelab_shared::{
    PaymentMethod, PaymentProviderKind, SubscriptionHistoryEntry, SubscriptionPlan,
    UserSubscription,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const DEFAULT_HISTORY_PAGE: i64 = 50;
const MAX_HISTORY_PAGE: i64 = 200;

/// The caller's subscription together with the plan it is on.
#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionResponse {
    pub subscription: UserSubscription,
    pub plan: SubscriptionPlan,
    pub has_access: bool,
    pub days_until_expiry: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<SubscriptionHistoryEntry>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan_id: Uuid,
    pub provider: PaymentProviderKind,
    /// Receipt email forwarded to the provider's hosted page.
    pub customer_email: Option<String>,
    /// Crypto currency to settle in (NOWPayments only).
    pub pay_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCheckoutQuery {
    pub order_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    pub amount_cents: i64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub amount_cents: i64,
    pub from: String,
    pub to: String,
    pub estimated_amount: f64,
}

/// `GET /api/plans` - every plan a user can sign up for. Public.
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<SubscriptionPlan>>> {
    let plans = state.billing.store.list_plans(false).await?;
    Ok(Json(plans))
}

/// `GET /api/subscriptions/current` - the caller's subscription joined with
/// its plan. Serializes to JSON `null` for users who never subscribed.
pub async fn current_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Option<CurrentSubscriptionResponse>>> {
    let subscription = state
        .billing
        .store
        .current_subscription(auth_user.user_id)
        .await?;

    let Some(subscription) = subscription else {
        return Ok(Json(None));
    };

    let plan = state.billing.store.get_plan(subscription.plan_id).await?;
    let now = OffsetDateTime::now_utc();

    Ok(Json(Some(CurrentSubscriptionResponse {
        has_access: subscription.has_access(now),
        days_until_expiry: subscription.days_until_expiry(now),
        subscription,
        plan,
    })))
}

/// `GET /api/billing/history` - the caller's ledger, newest first.
pub async fn billing_history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_PAGE)
        .clamp(1, MAX_HISTORY_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);

    let entries = state
        .billing
        .store
        .history_for_user(auth_user.user_id, limit, offset)
        .await?;

    Ok(Json(HistoryResponse {
        entries,
        limit,
        offset,
    }))
}

/// `POST /api/billing/checkout` - start a signup or renewal payment through
/// the chosen provider. Free plans activate immediately and return no
/// payment; paid plans return the provider's checkout URL or pay address.
pub async fn start_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutStart>> {
    tracing::info!(
        user_id = %auth_user.user_id,
        plan_id = %req.plan_id,
        provider = %req.provider,
        "Checkout requested"
    );

    let checkout = state
        .billing
        .checkout
        .start_checkout(
            auth_user.user_id,
            req.plan_id,
            req.provider,
            req.customer_email,
            req.pay_currency,
        )
        .await?;

    Ok(Json(checkout))
}

/// `GET /api/billing/checkout/verify?order_ref=` - confirmation for a user
/// landing back on the return URL. Asks the provider for the payment's real
/// state instead of trusting redirect query parameters.
pub async fn verify_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<VerifyCheckoutQuery>,
) -> ApiResult<Json<VerifyResult>> {
    let result = state
        .billing
        .checkout
        .verify_payment(&query.order_ref, auth_user.user_id)
        .await?;

    Ok(Json(result))
}

/// `GET /api/billing/estimate?amount_cents&from&to` - crypto settlement
/// estimate via NOWPayments.
pub async fn estimate(
    State(state): State<AppState>,
    Query(query): Query<EstimateQuery>,
) -> ApiResult<Json<EstimateResponse>> {
    if query.amount_cents <= 0 {
        return Err(ApiError::BadRequest(
            "amount_cents must be positive".to_string(),
        ));
    }

    let estimated_amount = state
        .billing
        .checkout
        .estimate(
            PaymentProviderKind::Nowpayments,
            query.amount_cents,
            &query.from,
            &query.to,
        )
        .await?;

    Ok(Json(EstimateResponse {
        amount_cents: query.amount_cents,
        from: query.from,
        to: query.to,
        estimated_amount,
    }))
}

/// `GET /api/payment-methods`
pub async fn payment_methods(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<PaymentMethod>>> {
    let methods = state.billing.store.payment_methods(auth_user.user_id).await?;
    Ok(Json(methods))
}

/// `POST /api/payment-methods/{id}/default`
pub async fn set_default_payment_method(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(method_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state
        .billing
        .store
        .set_default_payment_method(auth_user.user_id, method_id)
        .await?;

    tracing::info!(
        user_id = %auth_user.user_id,
        method_id = %method_id,
        "Default payment method changed"
    );

    Ok(Json(json!({ "success": true })))
}
