//! Time-driven reconciliation sweeps.
//!
//! Three independent, re-runnable tasks: expire lapsed subscriptions, remind
//! upcoming renewals, reap abandoned signups. Items are processed one at a
//! time and one item's failure never aborts the rest; failures are counted
//! into the summary and logged.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::notifications::{templates, NotificationSender};
use crate::settings::SettingsStore;
use crate::store::SubscriptionStore;
use crate::subscriptions::{SubscriptionService, TransitionOutcome};

pub const TASK_EXPIRATION: &str = "expiration_sweep";
pub const TASK_REMINDERS: &str = "renewal_reminders";
pub const TASK_PENDING_REAPER: &str = "pending_signup_reaper";

pub const AVAILABLE_TASKS: [&str; 3] = [TASK_EXPIRATION, TASK_REMINDERS, TASK_PENDING_REAPER];

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub task: &'static str,
    pub scanned: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failures: usize,
}

impl SweepSummary {
    fn new(task: &'static str, scanned: usize) -> Self {
        Self {
            task,
            scanned,
            applied: 0,
            skipped: 0,
            failures: 0,
        }
    }
}

/// Result of one scheduler invocation, returned to the triggering caller.
#[derive(Debug, Serialize)]
pub struct SchedulerRunSummary {
    pub success: bool,
    pub tasks: Vec<SweepSummary>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct ReminderCandidate {
    id: Uuid,
    user_id: Uuid,
    current_period_end: OffsetDateTime,
    reminder_sent_for: Option<OffsetDateTime>,
    plan_name: String,
}

/// The marker dedupe rule: a reminder is owed unless one was already sent
/// for this exact period end. A renewal moves the period end, which re-arms
/// the reminder on its own.
pub(crate) fn reminder_owed(
    reminder_sent_for: Option<OffsetDateTime>,
    current_period_end: OffsetDateTime,
) -> bool {
    reminder_sent_for != Some(current_period_end)
}

pub struct SchedulerService {
    pool: PgPool,
    subscriptions: SubscriptionService,
    store: SubscriptionStore,
    settings: SettingsStore,
    notifier: Arc<dyn NotificationSender>,
}

impl SchedulerService {
    pub fn new(
        pool: PgPool,
        settings: SettingsStore,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            subscriptions: SubscriptionService::new(pool.clone()),
            store: SubscriptionStore::new(pool.clone()),
            settings,
            notifier,
            pool,
        }
    }

    /// Run every task, or just the ones named in `only`. A task whose
    /// candidate scan fails is reported as a failed task; the rest still run.
    pub async fn run_all(&self, only: Option<&[String]>) -> BillingResult<SchedulerRunSummary> {
        let selected: Vec<&'static str> = match only {
            None => AVAILABLE_TASKS.to_vec(),
            Some(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    match AVAILABLE_TASKS.iter().find(|task| **task == name.as_str()) {
                        Some(task) => selected.push(*task),
                        None => {
                            return Err(BillingError::InvalidRequest(format!(
                                "unknown scheduler task '{}'",
                                name
                            )))
                        }
                    }
                }
                selected
            }
        };

        let mut tasks = Vec::with_capacity(selected.len());
        for task in selected {
            let summary = match self.run_task(task).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(task, error = %e, "Scheduler task failed");
                    let mut failed = SweepSummary::new(task, 0);
                    failed.failures = 1;
                    failed
                }
            };
            tasks.push(summary);
        }

        let success = tasks.iter().all(|task| task.failures == 0);
        Ok(SchedulerRunSummary {
            success,
            tasks,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    async fn run_task(&self, task: &'static str) -> BillingResult<SweepSummary> {
        match task {
            TASK_EXPIRATION => self.run_expiration_sweep().await,
            TASK_REMINDERS => self.run_reminder_sweep().await,
            TASK_PENDING_REAPER => self.run_pending_signup_reaper().await,
            _ => Err(BillingError::InvalidRequest(format!(
                "unknown scheduler task '{}'",
                task
            ))),
        }
    }

    // ========================================================================
    // Expiration sweep
    // ========================================================================

    /// Close every active or past_due subscription whose period has elapsed.
    /// Safe to re-run: a second pass finds nothing left to expire, and a
    /// renewal landing mid-sweep makes that item a skip, not an error.
    pub async fn run_expiration_sweep(&self) -> BillingResult<SweepSummary> {
        let candidates: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT id, user_id FROM user_subscriptions
            WHERE status IN ('active', 'past_due') AND current_period_end < NOW()
            ORDER BY current_period_end ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let mut summary = SweepSummary::new(TASK_EXPIRATION, candidates.len());

        for (subscription_id, user_id) in candidates {
            match self.subscriptions.expire(subscription_id).await {
                Ok(TransitionOutcome::Applied) => {
                    summary.applied += 1;
                    self.notifier
                        .send(
                            user_id,
                            templates::SUBSCRIPTION_EXPIRED,
                            &serde_json::json!({}),
                        )
                        .await;
                }
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Failed to expire subscription"
                    );
                }
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            applied = summary.applied,
            skipped = summary.skipped,
            failures = summary.failures,
            "Expiration sweep complete"
        );
        Ok(summary)
    }

    // ========================================================================
    // Renewal reminders
    // ========================================================================

    /// Remind active subscriptions whose period ends inside the reminder
    /// window. The marker records which period end was reminded about, so a
    /// renewal, which moves the period end, naturally re-arms it.
    pub async fn run_reminder_sweep(&self) -> BillingResult<SweepSummary> {
        let window_days = self.settings.reminder_window_days().await?;

        let candidates: Vec<ReminderCandidate> = sqlx::query_as(
            r#"
            SELECT s.id, s.user_id, s.current_period_end, s.reminder_sent_for,
                   p.display_name AS plan_name
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.status = 'active'
              AND s.current_period_end > NOW()
              AND s.current_period_end <= NOW() + ($1 || ' days')::INTERVAL
            "#,
        )
        .bind(window_days)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let mut summary = SweepSummary::new(TASK_REMINDERS, candidates.len());
        let now = OffsetDateTime::now_utc();

        for candidate in candidates {
            if !reminder_owed(candidate.reminder_sent_for, candidate.current_period_end) {
                summary.skipped += 1;
                continue;
            }

            let days_left = (candidate.current_period_end - now).whole_days();
            let sent = self
                .notifier
                .send(
                    candidate.user_id,
                    templates::RENEWAL_REMINDER,
                    &serde_json::json!({
                        "plan": candidate.plan_name,
                        "days_left": days_left,
                        "period_end": candidate.current_period_end.to_string(),
                    }),
                )
                .await;

            // Mark only after a successful send; a failed send stays
            // unmarked and retries on the next run.
            if !sent {
                summary.failures += 1;
                continue;
            }

            match self
                .mark_reminded(candidate.id, candidate.current_period_end)
                .await
            {
                Ok(true) => summary.applied += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(
                        subscription_id = %candidate.id,
                        error = %e,
                        "Failed to record reminder marker"
                    );
                }
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            applied = summary.applied,
            skipped = summary.skipped,
            failures = summary.failures,
            "Reminder sweep complete"
        );
        Ok(summary)
    }

    /// Guarded by the period end so a renewal racing the sweep leaves the
    /// fresh period unmarked.
    async fn mark_reminded(
        &self,
        subscription_id: Uuid,
        period_end: OffsetDateTime,
    ) -> BillingResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET reminder_sent_for = $2
            WHERE id = $1 AND current_period_end = $2
            "#,
        )
        .bind(subscription_id)
        .bind(period_end)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    // ========================================================================
    // Pending signup reaper
    // ========================================================================

    /// Drop signups whose first payment never arrived.
    pub async fn run_pending_signup_reaper(&self) -> BillingResult<SweepSummary> {
        let ttl_hours = self.settings.pending_signup_ttl_hours().await?;
        let reaped = self.store.reap_stale_pending(ttl_hours).await? as usize;

        let mut summary = SweepSummary::new(TASK_PENDING_REAPER, reaped);
        summary.applied = reaped;
        Ok(summary)
    }
}
