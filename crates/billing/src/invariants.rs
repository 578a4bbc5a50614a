//! Runnable consistency checks for the billing data.
//!
//! Each check is a plain SQL query over the live tables: read-only, safe to
//! run at any time, cheap enough for a nightly cron. Violations carry enough
//! context to debug from the log line alone.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// One invariant breach found in the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money may be moving wrongly
    Critical,
    /// Access or audit data is off; needs attention soon
    High,
    /// Worth investigating, not urgent
    Medium,
    /// Informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleLiveRow {
    user_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateTxnRow {
    transaction_id: String,
    row_count: i64,
    user_ids: Vec<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnpaidActiveRow {
    sub_id: Uuid,
    user_id: Uuid,
    plan_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleExpiryRow {
    sub_id: Uuid,
    user_id: Uuid,
    current_period_end: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct CancelledNoTimestampRow {
    sub_id: Uuid,
    user_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct ConsumedTrialRow {
    pending_id: Uuid,
    sub_id: Uuid,
    user_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct PeriodBoundsRow {
    sub_id: Uuid,
    user_id: Uuid,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct MultiDefaultRow {
    user_id: Uuid,
    method_count: i64,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_live_subscription().await?);
        violations.extend(self.check_unique_transaction_ids().await?);
        violations.extend(self.check_active_has_payment_history().await?);
        violations.extend(self.check_expired_period_elapsed().await?);
        violations.extend(self.check_cancelled_has_timestamp().await?);
        violations.extend(self.check_consumed_signup_activated().await?);
        violations.extend(self.check_period_bounds_ordered().await?);
        violations.extend(self.check_single_default_payment_method().await?);

        let checks_run = 8;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: at most one live subscription per user.
    ///
    /// Signup blocks while a subscription is active or past_due, so two live
    /// rows mean double billing.
    async fn check_single_live_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleLiveRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) AS sub_count
            FROM user_subscriptions
            WHERE status IN ('active', 'past_due')
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_live_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} live subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: at most one ledger row per external transaction id.
    ///
    /// The partial unique index enforces this at write time; the check
    /// catches restores or migrations that lost the index.
    async fn check_unique_transaction_ids(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateTxnRow> = sqlx::query_as(
            r#"
            SELECT
                transaction_id,
                COUNT(*) AS row_count,
                ARRAY_AGG(DISTINCT user_id) AS user_ids
            FROM user_subscription_history
            WHERE transaction_id IS NOT NULL
            GROUP BY transaction_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "unique_transaction_ids".to_string(),
                user_ids: row.user_ids,
                description: format!(
                    "Transaction '{}' appears in {} ledger rows; a payment was double-applied",
                    row.transaction_id, row.row_count
                ),
                context: serde_json::json!({
                    "transaction_id": row.transaction_id,
                    "row_count": row.row_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: an active subscription on a paid plan has a completed
    /// payment or renewal in its ledger.
    async fn check_active_has_payment_history(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnpaidActiveRow> = sqlx::query_as(
            r#"
            SELECT s.id AS sub_id, s.user_id, p.name AS plan_name
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.status = 'active'
              AND p.price_cents > 0
              AND NOT EXISTS (
                  SELECT 1 FROM user_subscription_history h
                  WHERE h.subscription_id = s.id
                    AND h.action_type IN ('payment', 'renewal')
                    AND h.payment_status = 'completed'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_has_payment_history".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Active subscription on paid plan '{}' has no completed payment in its ledger",
                    row.plan_name
                ),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "plan_name": row.plan_name,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: expired subscriptions actually ran out.
    ///
    /// Expiration is system-only and rechecks the period under a lock, so an
    /// expired row with a future period end means that guard was bypassed.
    async fn check_expired_period_elapsed(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleExpiryRow> = sqlx::query_as(
            r#"
            SELECT id AS sub_id, user_id, current_period_end
            FROM user_subscriptions
            WHERE status = 'expired'
              AND current_period_end >= NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "expired_period_elapsed".to_string(),
                user_ids: vec![row.user_id],
                description: "Subscription is expired but its period end is in the future"
                    .to_string(),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "current_period_end": row.current_period_end.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: cancelled subscriptions record when.
    async fn check_cancelled_has_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CancelledNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT id AS sub_id, user_id
            FROM user_subscriptions
            WHERE status = 'cancelled'
              AND cancelled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancelled_has_timestamp".to_string(),
                user_ids: vec![row.user_id],
                description: "Cancelled subscription has no cancelled_at timestamp".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Invariant 6: a consumed pending signup left the trial state.
    ///
    /// Consumption happens in the same transaction as activation, so a
    /// consumed record pointing at a trialing subscription means that
    /// transaction was torn.
    async fn check_consumed_signup_activated(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ConsumedTrialRow> = sqlx::query_as(
            r#"
            SELECT ps.id AS pending_id, ps.subscription_id AS sub_id, ps.user_id
            FROM pending_signups ps
            JOIN user_subscriptions s ON s.id = ps.subscription_id
            WHERE ps.consumed_at IS NOT NULL
              AND s.status = 'trialing'
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "consumed_signup_activated".to_string(),
                user_ids: vec![row.user_id],
                description: "Pending signup was consumed but its subscription never activated"
                    .to_string(),
                context: serde_json::json!({
                    "pending_signup_id": row.pending_id,
                    "subscription_id": row.sub_id,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 7: billing periods are ordered.
    async fn check_period_bounds_ordered(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PeriodBoundsRow> = sqlx::query_as(
            r#"
            SELECT id AS sub_id, user_id, current_period_start, current_period_end
            FROM user_subscriptions
            WHERE current_period_end < current_period_start
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "period_bounds_ordered".to_string(),
                user_ids: vec![row.user_id],
                description: "Subscription period ends before it starts".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                    "current_period_start": row.current_period_start.to_string(),
                    "current_period_end": row.current_period_end.to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 8: at most one default payment method per user.
    ///
    /// Also index-enforced at write time; see invariant 2.
    async fn check_single_default_payment_method(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultiDefaultRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) AS method_count
            FROM payment_methods
            WHERE is_default
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_default_payment_method".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} default payment methods (expected at most 1)",
                    row.method_count
                ),
                context: serde_json::json!({
                    "method_count": row.method_count,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_live_subscription" => self.check_single_live_subscription().await,
            "unique_transaction_ids" => self.check_unique_transaction_ids().await,
            "active_has_payment_history" => self.check_active_has_payment_history().await,
            "expired_period_elapsed" => self.check_expired_period_elapsed().await,
            "cancelled_has_timestamp" => self.check_cancelled_has_timestamp().await,
            "consumed_signup_activated" => self.check_consumed_signup_activated().await,
            "period_bounds_ordered" => self.check_period_bounds_ordered().await,
            "single_default_payment_method" => self.check_single_default_payment_method().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_live_subscription",
            "unique_transaction_ids",
            "active_has_payment_history",
            "expired_period_elapsed",
            "cancelled_has_timestamp",
            "consumed_signup_activated",
            "period_bounds_ordered",
            "single_default_payment_method",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 8);
        assert!(checks.contains(&"unique_transaction_ids"));
        assert!(checks.contains(&"single_live_subscription"));
        assert!(checks.contains(&"single_default_payment_method"));
    }
}
