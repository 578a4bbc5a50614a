//! API error type and its HTTP mapping.
//!
//! Handlers return `ApiResult<T>` and let `?` funnel every failure through
//! one `IntoResponse` impl, so status codes and body shape stay uniform
//! across routes. Messages sent to clients are generic; the specifics go to
//! the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tradelab_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The identity proxy did not inject a usable `x-user-id` header.
    #[error("Authentication required")]
    MissingIdentity,

    /// Internal route called without a valid internal API key.
    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for each failure class. Webhook senders retry on 5xx, so
    /// only genuinely retryable failures may map there; everything the
    /// caller got wrong stays 4xx.
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Billing(inner) => match inner {
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::SignatureInvalid
                | BillingError::InvalidRequest(_)
                | BillingError::PaymentDeclined(_) => StatusCode::BAD_REQUEST,
                BillingError::InvalidTransition { .. } | BillingError::PlanInUse(_) => {
                    StatusCode::CONFLICT
                }
                BillingError::ProviderUnavailable { .. }
                | BillingError::ConcurrentModification(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::Config(_)
                | BillingError::Database(_)
                | BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message safe to hand to the caller. Database and config details never
    /// leave the process.
    fn public_message(&self) -> String {
        match self {
            ApiError::MissingIdentity => "Authentication required".to_string(),
            ApiError::Forbidden => "Forbidden".to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound(what) => format!("{} not found", what),
            ApiError::Internal(_) => "Internal server error".to_string(),
            ApiError::Billing(inner) => match inner {
                BillingError::NotFound(what) => format!("{} not found", what),
                BillingError::SignatureInvalid => "Invalid webhook signature".to_string(),
                BillingError::InvalidRequest(msg) => msg.clone(),
                BillingError::PaymentDeclined(_) => "Payment was declined".to_string(),
                BillingError::InvalidTransition { from, action } => {
                    format!("Cannot {} a subscription in status {}", action, from)
                }
                BillingError::PlanInUse(_) => {
                    "Plan has active subscriptions and cannot be deleted".to_string()
                }
                BillingError::ProviderUnavailable { .. } => {
                    "Payment provider temporarily unavailable".to_string()
                }
                BillingError::ConcurrentModification(_) => {
                    "Subscription was modified concurrently, retry the request".to_string()
                }
                BillingError::Config(_)
                | BillingError::Database(_)
                | BillingError::Internal(_) => "Internal server error".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let body = Json(json!({
            "error": self.public_message(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tradelab_shared::{PaymentProviderKind, SubscriptionStatus};
    use uuid::Uuid;

    fn status_of(err: ApiError) -> StatusCode {
        err.status_code()
    }

    #[test]
    fn billing_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(BillingError::SignatureInvalid.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                BillingError::ProviderUnavailable {
                    provider: PaymentProviderKind::Stripe,
                    detail: "timeout".to_string(),
                }
                .into()
            ),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(BillingError::NotFound("plan".to_string()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(BillingError::PlanInUse(Uuid::new_v4()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BillingError::Database("connection reset".to_string()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(BillingError::ConcurrentModification("status row".to_string()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn guard_errors_map_to_auth_statuses() {
        assert_eq!(status_of(ApiError::MissingIdentity), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ApiError::Forbidden), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_detail_stays_out_of_the_public_message() {
        let err: ApiError = BillingError::Database("password authentication failed".to_string()).into();
        assert_eq!(err.public_message(), "Internal server error");

        let err = ApiError::Internal("pool exhausted".to_string());
        assert_eq!(err.public_message(), "Internal server error");

        let declined: ApiError =
            BillingError::PaymentDeclined("card_declined: insufficient_funds".to_string()).into();
        assert_eq!(declined.public_message(), "Payment was declined");
    }

    #[test]
    fn transition_conflicts_name_the_blocked_action() {
        let err: ApiError = BillingError::InvalidTransition {
            from: SubscriptionStatus::Expired,
            action: "cancel",
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            err.public_message(),
            "Cannot cancel a subscription in status expired"
        );
    }
}
