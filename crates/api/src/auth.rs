//! Caller identity and the internal-route guard.
//!
//! Authentication itself lives upstream: an identity proxy terminates the
//! session and injects `x-user-id` before the request reaches us. This
//! module only extracts that id for /api routes and checks the shared
//! operator key on /internal routes. Neither guard touches the database.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const INTERNAL_KEY_HEADER: &str = "x-internal-api-key";

/// Caller identity as asserted by the identity proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

fn extract_user_id(request: &Request) -> Option<Uuid> {
    request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

/// Middleware for /api routes: requires a well-formed `x-user-id` header and
/// makes it available to handlers as an `AuthUser` extension.
pub async fn require_identity(mut request: Request, next: Next) -> Response {
    match extract_user_id(&request) {
        Some(user_id) => {
            request.extensions_mut().insert(AuthUser { user_id });
            next.run(request).await
        }
        None => {
            tracing::warn!(
                path = %request.uri().path(),
                "Request missing or malformed x-user-id header"
            );
            ApiError::MissingIdentity.into_response()
        }
    }
}

/// Middleware for /internal routes. The comparison is constant-time so the
/// key cannot be probed byte by byte through response timing.
pub async fn require_internal_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if constant_time_eq(presented, &state.config.internal_api_key) {
        next.run(request).await
    } else {
        tracing::warn!(
            path = %request.uri().path(),
            "Internal route called with a bad or missing key"
        );
        ApiError::Forbidden.into_response()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_header(name: &str, value: &str) -> Request {
        Request::builder()
            .uri("/api/subscriptions/current")
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn extracts_well_formed_user_id() {
        let id = Uuid::new_v4();
        let request = request_with_header(USER_ID_HEADER, &id.to_string());
        assert_eq!(extract_user_id(&request), Some(id));
    }

    #[test]
    fn trims_whitespace_around_user_id() {
        let id = Uuid::new_v4();
        let request = request_with_header(USER_ID_HEADER, &format!("  {}  ", id));
        assert_eq!(extract_user_id(&request), Some(id));
    }

    #[test]
    fn rejects_malformed_user_id() {
        let request = request_with_header(USER_ID_HEADER, "not-a-uuid");
        assert_eq!(extract_user_id(&request), None);

        let request = Request::builder()
            .uri("/api/subscriptions/current")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_user_id(&request), None);
    }

    #[test]
    fn key_comparison_is_exact() {
        assert!(constant_time_eq("internal-key", "internal-key"));
        assert!(!constant_time_eq("internal-key", "internal-kez"));
        assert!(!constant_time_eq("internal-key", "internal-key2"));
        assert!(!constant_time_eq("", "internal-key"));
    }
}
