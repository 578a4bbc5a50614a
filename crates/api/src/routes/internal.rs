//! Operator routes, reachable only with the internal API key.
//!
//! These are the manual counterparts of what the worker does on a schedule:
//! trigger sweeps, run the invariant checker, cancel or move a subscription
//! by hand, and manage the plan catalog.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tradelab_billing::{
    AppSetting, CancelOutcome, InvariantCheckSummary, InvariantChecker, InvariantViolation,
    NewPlan, PlanChangeSource, PlanUpdate, SchedulerRunSummary,
};
use tradelab_shared::{SubscriptionPlan, SubscriptionStatus, UserSubscription};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct RunSchedulerRequest {
    /// Restrict the run to these tasks; omitted means all of them.
    pub tasks: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<UserSubscription>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub new_plan_id: Uuid,
    pub reason: Option<String>,
}

/// `POST /internal/scheduler/run` - run the sweeps now instead of waiting
/// for the worker's next tick. Accepts an optional task filter in the body.
pub async fn run_scheduler(
    State(state): State<AppState>,
    body: Option<Json<RunSchedulerRequest>>,
) -> ApiResult<Json<SchedulerRunSummary>> {
    let Json(req) = body.unwrap_or_default();

    tracing::info!(tasks = ?req.tasks, "Manual scheduler run triggered");

    let summary = state
        .billing
        .scheduler
        .run_all(req.tasks.as_deref())
        .await?;

    Ok(Json(summary))
}

/// `POST /internal/subscriptions/{id}/cancel` - operator cancellation.
/// Access keeps running until the paid period ends; cancelling an already
/// terminal subscription reports success without changing anything.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<CancelResponse>> {
    let outcome = state
        .billing
        .cancel_subscription(subscription_id, req.reason)
        .await?;

    let response = match outcome {
        CancelOutcome::Cancelled(subscription) => CancelResponse {
            cancelled: true,
            status: subscription.status,
            subscription: Some(subscription),
        },
        CancelOutcome::NotCancellable(status) => CancelResponse {
            cancelled: false,
            status,
            subscription: None,
        },
    };

    Ok(Json(response))
}

/// `POST /internal/subscriptions/{id}/change-plan` - move a subscription to
/// another plan. Price applies from the next renewal.
pub async fn change_plan(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<UserSubscription>> {
    let subscription = state
        .billing
        .subscriptions
        .change_plan(
            subscription_id,
            req.new_plan_id,
            PlanChangeSource::AdminPanel,
            req.reason,
        )
        .await?;

    Ok(Json(subscription))
}

/// `GET /internal/invariants` - run every consistency check and report.
pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.billing.invariants.run_all_checks().await?;

    if !summary.healthy {
        tracing::error!(
            checks_failed = summary.checks_failed,
            violations = summary.violations.len(),
            "Invariant check found violations"
        );
    }

    Ok(Json(summary))
}

/// `GET /internal/invariants/{name}` - run one named check, for digging
/// into a specific violation without paying for the full pass.
pub async fn run_invariant(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<InvariantViolation>>> {
    if !InvariantChecker::available_checks().contains(&name.as_str()) {
        return Err(ApiError::NotFound(format!("invariant check '{}'", name)));
    }

    let violations = state.billing.invariants.run_check(&name).await?;
    Ok(Json(violations))
}

// ============================================================================
// Plan catalog
// ============================================================================

/// `POST /internal/plans`
pub async fn create_plan(
    State(state): State<AppState>,
    Json(plan): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<SubscriptionPlan>)> {
    let created = state.billing.store.create_plan(plan).await?;

    tracing::info!(plan_id = %created.id, name = %created.name, "Plan created");

    Ok((StatusCode::CREATED, Json(created)))
}

/// `PATCH /internal/plans/{id}`
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(update): Json<PlanUpdate>,
) -> ApiResult<Json<SubscriptionPlan>> {
    let updated = state.billing.store.update_plan(plan_id, update).await?;

    tracing::info!(plan_id = %plan_id, "Plan updated");

    Ok(Json(updated))
}

/// `DELETE /internal/plans/{id}` - refused with 409 while any subscription
/// still references the plan; retire with `is_active = false` instead.
pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.billing.store.delete_plan(plan_id).await?;

    tracing::info!(plan_id = %plan_id, "Plan deleted");

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Runtime settings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PutSettingRequest {
    pub value: serde_json::Value,
}

/// `GET /internal/settings` - every stored override. Keys that were never
/// written stay on their config defaults and do not appear here.
pub async fn list_settings(State(state): State<AppState>) -> ApiResult<Json<Vec<AppSetting>>> {
    let settings = state.billing.settings.list().await?;
    Ok(Json(settings))
}

/// `PUT /internal/settings/{key}` - store an override. Takes effect on the
/// next read; no deploy needed.
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<PutSettingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.billing.settings.set(&key, req.value).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// `DELETE /internal/settings/{key}` - drop an override, reverting the key
/// to its config default.
pub async fn delete_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.billing.settings.delete(&key).await? {
        return Err(ApiError::NotFound(format!("setting '{}'", key)));
    }

    tracing::info!(key = %key, "Setting override removed");
    Ok(StatusCode::NO_CONTENT)
}
