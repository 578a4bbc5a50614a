//! TradeLab Background Worker
//!
//! Runs the time-driven half of the billing lifecycle:
//! - Expiration sweep over elapsed subscriptions (hourly at :05)
//! - Renewal reminders ahead of period end (daily at 09:00 UTC)
//! - Billing invariant checks (nightly at 02:30 UTC)
//! - Pending signup reaper for abandoned checkouts (daily at 03:15 UTC)
//!
//! Every job swallows and logs its own failures; a bad run never takes the
//! worker down with it.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use tradelab_billing::{BillingService, SweepSummary};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Log one sweep's counters at a level matching how it went.
fn log_sweep(summary: &SweepSummary) {
    if summary.failures > 0 {
        warn!(
            task = summary.task,
            scanned = summary.scanned,
            applied = summary.applied,
            skipped = summary.skipped,
            failures = summary.failures,
            "Sweep finished with failures"
        );
    } else {
        info!(
            task = summary.task,
            scanned = summary.scanned,
            applied = summary.applied,
            skipped = summary.skipped,
            "Sweep complete"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting TradeLab Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Every job below needs the billing service, so a broken billing
    // configuration is a startup failure rather than a degraded mode.
    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(error = %e, "Failed to create billing service");
            return Err(e.into());
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Expiration sweep (hourly at :05)
    // Closes out active/past_due subscriptions whose period has elapsed
    let expiration_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 5 * * * *", move |_uuid, _l| {
            let billing = expiration_billing.clone();
            Box::pin(async move {
                info!("Running expiration sweep");
                match billing.scheduler.run_expiration_sweep().await {
                    Ok(summary) => log_sweep(&summary),
                    Err(e) => error!(error = %e, "Expiration sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expiration sweep (hourly at :05)");

    // Job 2: Renewal reminders (daily at 09:00 UTC)
    let reminder_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 9 * * *", move |_uuid, _l| {
            let billing = reminder_billing.clone();
            Box::pin(async move {
                info!("Running renewal reminder sweep");
                match billing.scheduler.run_reminder_sweep().await {
                    Ok(summary) => log_sweep(&summary),
                    Err(e) => error!(error = %e, "Reminder sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Renewal reminders (daily at 09:00 UTC)");

    // Job 3: Invariant checks (nightly at 02:30 UTC)
    // Violations are data incidents; log each one at error level
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 2 * * *", move |_uuid, _l| {
            let billing = invariant_billing.clone();
            Box::pin(async move {
                info!("Running nightly invariant checks");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(
                            checks_run = summary.checks_run,
                            "Invariant checks passed"
                        );
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            error!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                affected_users = violation.user_ids.len(),
                                description = %violation.description,
                                "Invariant violation"
                            );
                        }
                        error!(
                            checks_run = summary.checks_run,
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Invariant checks found violations"
                        );
                    }
                    Err(e) => error!(error = %e, "Invariant checks failed to run"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Invariant checks (nightly at 02:30 UTC)");

    // Job 4: Pending signup reaper (daily at 03:15 UTC)
    // Deletes unconsumed signups older than the configured TTL
    let reaper_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 15 3 * * *", move |_uuid, _l| {
            let billing = reaper_billing.clone();
            Box::pin(async move {
                info!("Running pending signup reaper");
                match billing.scheduler.run_pending_signup_reaper().await {
                    Ok(summary) => log_sweep(&summary),
                    Err(e) => error!(error = %e, "Pending signup reaper failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending signup reaper (daily at 03:15 UTC)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("TradeLab Worker started successfully with {} scheduled jobs", 4);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
