//! Subscription lifecycle state machine.
//!
//! Every transition runs in one transaction: lock the row, re-check the
//! state under the lock, apply a status-guarded update and append the ledger
//! entry, then commit. The guard doubles as an optimistic check so a missed
//! lock can never half-apply a transition.
//!
//! Replayed payment events are absorbed here: the ledger's transaction id is
//! checked under the row lock, and a duplicate becomes a no-op success
//! instead of a second period extension.

use sqlx::{PgPool, Postgres, Transaction};
use time::{Duration, OffsetDateTime};
use tradelab_shared::{
    HistoryAction, PaymentProviderKind, PendingSignup, SubscriptionPlan, SubscriptionStatus,
    UserSubscription,
};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Payment facts recorded in the ledger next to a transition.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    /// Provider transaction id; the ledger's idempotency key.
    pub transaction_id: String,
    pub provider: PaymentProviderKind,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Result of an activation attempt.
#[derive(Debug)]
pub enum ActivationOutcome {
    /// Moved to active with a fresh billing period.
    Applied(UserSubscription),
    /// This transaction id was already recorded; nothing changed.
    AlreadyProcessed,
    /// The subscription is terminal and cannot activate; logged, not applied.
    Skipped(SubscriptionStatus),
}

/// Result of a system transition (past due, expire).
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    AlreadyProcessed,
    /// Preconditions no longer hold; the retrigger is a no-op success.
    Skipped(SubscriptionStatus),
}

/// Result of a cancellation attempt.
#[derive(Debug)]
pub enum CancelOutcome {
    Cancelled(UserSubscription),
    /// Already terminal; logged and acknowledged without change.
    NotCancellable(SubscriptionStatus),
}

/// Who asked for a plan change. Recorded in the ledger reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChangeSource {
    UserRequest,
    AdminPanel,
}

impl PlanChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanChangeSource::UserRequest => "user_request",
            PlanChangeSource::AdminPanel => "admin_panel",
        }
    }
}

impl std::fmt::Display for PlanChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A freshly created signup. Paid plans get a pending record the webhook
/// consumes; free plans activate immediately and have no pending record.
#[derive(Debug)]
pub struct SignupResult {
    pub subscription: UserSubscription,
    pub pending: Option<PendingSignup>,
    pub order_ref: String,
}

struct LedgerEntry<'a> {
    user_id: Uuid,
    subscription_id: Uuid,
    action: HistoryAction,
    previous_plan_id: Option<Uuid>,
    new_plan_id: Option<Uuid>,
    payment_method: Option<&'a str>,
    payment_amount_cents: Option<i64>,
    payment_currency: Option<&'a str>,
    payment_status: Option<&'a str>,
    transaction_id: Option<&'a str>,
    reason: Option<&'a str>,
}

impl<'a> LedgerEntry<'a> {
    fn new(subscription: &UserSubscription, action: HistoryAction) -> Self {
        Self {
            user_id: subscription.user_id,
            subscription_id: subscription.id,
            action,
            previous_plan_id: None,
            new_plan_id: None,
            payment_method: None,
            payment_amount_cents: None,
            payment_currency: None,
            payment_status: None,
            transaction_id: None,
            reason: None,
        }
    }

    fn with_payment(mut self, payment: &'a PaymentDetails, status: &'a str) -> Self {
        self.payment_method = Some(payment.provider.as_str());
        self.payment_amount_cents = payment.amount_cents;
        self.payment_currency = payment.currency.as_deref();
        self.payment_status = Some(status);
        self.transaction_id = Some(&payment.transaction_id);
        self
    }
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Signup
    // ========================================================================

    /// Create a subscription for a user who has no live one.
    ///
    /// Paid plans start in `trialing` with a `trial_days` window and a
    /// pending signup record carrying the order_ref the payment will come
    /// back under. Free plans skip payment entirely and activate with one
    /// full billing cycle.
    pub async fn create_signup(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        provider: PaymentProviderKind,
        trial_days: i64,
    ) -> BillingResult<SignupResult> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let plan: Option<SubscriptionPlan> =
            sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;
        let plan = plan.ok_or_else(|| BillingError::NotFound(format!("plan {}", plan_id)))?;

        if !plan.is_active {
            return Err(BillingError::InvalidRequest(format!(
                "plan '{}' is retired",
                plan.name
            )));
        }

        let now = OffsetDateTime::now_utc();

        // The current subscription is the most recent row. A live one blocks
        // a second signup; an abandoned trial or a terminal one does not.
        let latest: Option<UserSubscription> = sqlx::query_as(
            r#"
            SELECT * FROM user_subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        if let Some(existing) = &latest {
            let blocks = match existing.status {
                SubscriptionStatus::Active | SubscriptionStatus::PastDue => true,
                SubscriptionStatus::Trialing => !existing.period_elapsed(now),
                SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => false,
            };
            if blocks {
                return Err(BillingError::InvalidRequest(format!(
                    "user already has a {} subscription",
                    existing.status
                )));
            }
        }

        let order_ref = generate_order_ref();
        let (opening_status, opening_days) = signup_opening(&plan, trial_days);
        let period_end = now + Duration::days(opening_days);

        let subscription: UserSubscription = sqlx::query_as(
            r#"
            INSERT INTO user_subscriptions
                (user_id, plan_id, status, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(opening_status)
        .bind(now)
        .bind(period_end)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        if plan.is_free() {
            let mut entry = LedgerEntry::new(&subscription, HistoryAction::Payment);
            entry.new_plan_id = Some(plan_id);
            entry.payment_amount_cents = Some(0);
            entry.payment_status = Some("completed");
            entry.transaction_id = Some(&order_ref);
            entry.reason = Some("free plan signup");
            append_history(&mut tx, entry).await?;

            tx.commit()
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                plan = %plan.name,
                "Created free subscription"
            );

            return Ok(SignupResult {
                subscription,
                pending: None,
                order_ref,
            });
        }

        let pending: PendingSignup = sqlx::query_as(
            r#"
            INSERT INTO pending_signups (user_id, plan_id, subscription_id, provider, order_ref)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(subscription.id)
        .bind(provider)
        .bind(&order_ref)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan = %plan.name,
            provider = %provider,
            order_ref = %order_ref,
            "Created signup awaiting first payment"
        );

        Ok(SignupResult {
            subscription,
            pending: Some(pending),
            order_ref,
        })
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Activate a subscription off a successful payment, setting the period
    /// to `[now, now + period_length_days]`.
    ///
    /// Replays of the same transaction id return `AlreadyProcessed` without
    /// touching the row. Terminal subscriptions are never revived; the
    /// payment is logged loudly and skipped so a human can reconcile it.
    pub async fn activate(
        &self,
        subscription_id: Uuid,
        period_length_days: i64,
        payment: PaymentDetails,
    ) -> BillingResult<ActivationOutcome> {
        if period_length_days <= 0 {
            return Err(BillingError::InvalidRequest(format!(
                "period length must be positive, got {}",
                period_length_days
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let subscription = lock_subscription(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;

        if !subscription
            .status
            .can_transition_to(SubscriptionStatus::Active)
        {
            tracing::error!(
                subscription_id = %subscription_id,
                status = %subscription.status,
                transaction_id = %payment.transaction_id,
                "Payment received for a subscription that cannot activate; needs manual reconciliation"
            );
            return Ok(ActivationOutcome::Skipped(subscription.status));
        }

        if transaction_seen(&mut tx, &payment.transaction_id).await? {
            tracing::info!(
                subscription_id = %subscription_id,
                transaction_id = %payment.transaction_id,
                "Duplicate payment event; already recorded"
            );
            return Ok(ActivationOutcome::AlreadyProcessed);
        }

        let now = OffsetDateTime::now_utc();
        let period_end = now + Duration::days(period_length_days);

        let updated: Option<UserSubscription> = sqlx::query_as(
            r#"
            UPDATE user_subscriptions SET
                status = 'active',
                current_period_start = $2,
                current_period_end = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $4
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(now)
        .bind(period_end)
        .bind(subscription.status)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let updated = updated.ok_or_else(|| {
            BillingError::ConcurrentModification(
                "subscription status changed during activation".to_string(),
            )
        })?;

        // First paid activation out of trial is a payment; re-activations
        // from active or past_due are renewals.
        let action = if subscription.status == SubscriptionStatus::Trialing {
            HistoryAction::Payment
        } else {
            HistoryAction::Renewal
        };

        let mut entry = LedgerEntry::new(&updated, action).with_payment(&payment, "completed");
        entry.new_plan_id = Some(updated.plan_id);
        if let Err(e) = append_history(&mut tx, entry).await {
            // A unique violation here means the same transaction id landed on
            // another subscription's ledger concurrently; treat it as a replay.
            if let BillingError::Database(detail) = &e {
                if detail.contains("idx_history_transaction_id") {
                    tx.rollback()
                        .await
                        .map_err(|e| BillingError::Database(e.to_string()))?;
                    tracing::info!(
                        transaction_id = %payment.transaction_id,
                        "Transaction id claimed concurrently; treating as replay"
                    );
                    return Ok(ActivationOutcome::AlreadyProcessed);
                }
            }
            return Err(e);
        }

        // The payment that activates a signup settles its pending record.
        sqlx::query(
            "UPDATE pending_signups SET consumed_at = NOW() WHERE subscription_id = $1 AND consumed_at IS NULL",
        )
        .bind(subscription_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            subscription_id = %subscription_id,
            from_status = %subscription.status,
            period_end = %period_end,
            transaction_id = %payment.transaction_id,
            provider = %payment.provider,
            "Subscription activated"
        );

        Ok(ActivationOutcome::Applied(updated))
    }

    // ========================================================================
    // Past due
    // ========================================================================

    /// Flag an active subscription whose renewal payment failed. Access is
    /// kept through the grace period; the expiration sweep closes it later.
    /// Only `active` subscriptions move; anything else is a logged no-op.
    pub async fn mark_past_due(
        &self,
        subscription_id: Uuid,
        payment: Option<PaymentDetails>,
    ) -> BillingResult<TransitionOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let subscription = lock_subscription(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;

        if subscription.status != SubscriptionStatus::Active {
            tracing::info!(
                subscription_id = %subscription_id,
                status = %subscription.status,
                "mark_past_due skipped; subscription is not active"
            );
            return Ok(TransitionOutcome::Skipped(subscription.status));
        }

        if let Some(payment) = &payment {
            if transaction_seen(&mut tx, &payment.transaction_id).await? {
                tracing::info!(
                    subscription_id = %subscription_id,
                    transaction_id = %payment.transaction_id,
                    "Duplicate failed-payment event; already recorded"
                );
                return Ok(TransitionOutcome::AlreadyProcessed);
            }
        }

        let rows_affected = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET status = 'past_due', updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(subscription_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(BillingError::ConcurrentModification(
                "subscription status changed while marking past due".to_string(),
            ));
        }

        let mut entry = LedgerEntry::new(&subscription, HistoryAction::Payment);
        if let Some(payment) = &payment {
            entry = entry.with_payment(payment, "failed");
        } else {
            entry.payment_status = Some("failed");
        }
        entry.reason = Some("renewal payment failed");
        append_history(&mut tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(subscription_id = %subscription_id, "Subscription marked past due");
        Ok(TransitionOutcome::Applied)
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a subscription at the user's or an admin's request. The paid
    /// period is never shortened: access continues until it runs out.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        reason: Option<String>,
    ) -> BillingResult<CancelOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let subscription = lock_subscription(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;

        if !subscription
            .status
            .can_transition_to(SubscriptionStatus::Cancelled)
        {
            tracing::info!(
                subscription_id = %subscription_id,
                status = %subscription.status,
                "Cancel requested for a terminal subscription; nothing to do"
            );
            return Ok(CancelOutcome::NotCancellable(subscription.status));
        }

        let updated: Option<UserSubscription> = sqlx::query_as(
            r#"
            UPDATE user_subscriptions SET
                status = 'cancelled',
                cancelled_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(subscription.status)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let updated = updated.ok_or_else(|| {
            BillingError::ConcurrentModification(
                "subscription status changed during cancellation".to_string(),
            )
        })?;

        let mut entry = LedgerEntry::new(&updated, HistoryAction::Cancellation);
        entry.reason = reason.as_deref();
        append_history(&mut tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            subscription_id = %subscription_id,
            from_status = %subscription.status,
            access_until = %updated.current_period_end,
            "Subscription cancelled"
        );

        Ok(CancelOutcome::Cancelled(updated))
    }

    // ========================================================================
    // Expiration
    // ========================================================================

    /// System-only transition that closes an `active` or `past_due`
    /// subscription whose period has elapsed. Rechecks both conditions under
    /// the lock, so a sweep racing a renewal resolves to a no-op.
    pub async fn expire(&self, subscription_id: Uuid) -> BillingResult<TransitionOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let subscription = lock_subscription(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;

        if !matches!(
            subscription.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        ) {
            return Ok(TransitionOutcome::Skipped(subscription.status));
        }

        let now = OffsetDateTime::now_utc();
        if !subscription.period_elapsed(now) {
            tracing::debug!(
                subscription_id = %subscription_id,
                period_end = %subscription.current_period_end,
                "Expiration skipped; a renewal landed before the sweep"
            );
            return Ok(TransitionOutcome::Skipped(subscription.status));
        }

        let rows_affected = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status = $2 AND current_period_end < NOW()
            "#,
        )
        .bind(subscription_id)
        .bind(subscription.status)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(BillingError::ConcurrentModification(
                "subscription changed while expiring".to_string(),
            ));
        }

        let mut entry = LedgerEntry::new(&subscription, HistoryAction::Expiration);
        entry.reason = Some("billing period elapsed");
        append_history(&mut tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            subscription_id = %subscription_id,
            from_status = %subscription.status,
            "Subscription expired"
        );

        Ok(TransitionOutcome::Applied)
    }

    // ========================================================================
    // Plan change
    // ========================================================================

    /// Move a live subscription to another plan. Status and period are
    /// untouched; the new price applies from the next renewal. The ledger
    /// records whether it was an upgrade or a downgrade by price.
    pub async fn change_plan(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
        source: PlanChangeSource,
        reason: Option<String>,
    ) -> BillingResult<UserSubscription> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let subscription = lock_subscription(&mut tx, subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;

        if subscription.status.is_terminal() {
            return Err(BillingError::InvalidTransition {
                from: subscription.status,
                action: "change the plan of",
            });
        }

        if subscription.plan_id == new_plan_id {
            return Err(BillingError::InvalidRequest(
                "subscription is already on this plan".to_string(),
            ));
        }

        let new_plan: Option<SubscriptionPlan> =
            sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(new_plan_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;
        let new_plan =
            new_plan.ok_or_else(|| BillingError::NotFound(format!("plan {}", new_plan_id)))?;

        if !new_plan.is_active && source == PlanChangeSource::UserRequest {
            return Err(BillingError::InvalidRequest(format!(
                "plan '{}' is retired",
                new_plan.name
            )));
        }

        let old_price: i64 =
            sqlx::query_scalar("SELECT price_cents FROM subscription_plans WHERE id = $1")
                .bind(subscription.plan_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        let action = if new_plan.price_cents > old_price {
            HistoryAction::Upgrade
        } else {
            HistoryAction::Downgrade
        };

        let updated: Option<UserSubscription> = sqlx::query_as(
            r#"
            UPDATE user_subscriptions
            SET plan_id = $2, updated_at = NOW()
            WHERE id = $1 AND plan_id = $3
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(new_plan_id)
        .bind(subscription.plan_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        let updated = updated.ok_or_else(|| {
            BillingError::ConcurrentModification(
                "subscription plan changed by another request".to_string(),
            )
        })?;

        let reason_text = reason.unwrap_or_else(|| format!("plan change via {}", source));
        let mut entry = LedgerEntry::new(&updated, action);
        entry.previous_plan_id = Some(subscription.plan_id);
        entry.new_plan_id = Some(new_plan_id);
        entry.reason = Some(&reason_text);
        append_history(&mut tx, entry).await?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            subscription_id = %subscription_id,
            from_plan = %subscription.plan_id,
            to_plan = %new_plan_id,
            action = %action,
            source = %source,
            "Subscription plan changed"
        );

        Ok(updated)
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

async fn lock_subscription(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
) -> BillingResult<Option<UserSubscription>> {
    sqlx::query_as("SELECT * FROM user_subscriptions WHERE id = $1 FOR UPDATE")
        .bind(subscription_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))
}

async fn transaction_seen(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: &str,
) -> BillingResult<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM user_subscription_history WHERE transaction_id = $1)",
    )
    .bind(transaction_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| BillingError::Database(e.to_string()))
}

async fn append_history(
    tx: &mut Transaction<'_, Postgres>,
    entry: LedgerEntry<'_>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_subscription_history
            (user_id, subscription_id, action_type, previous_plan_id, new_plan_id,
             payment_method, payment_amount_cents, payment_currency, payment_status,
             transaction_id, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.subscription_id)
    .bind(entry.action)
    .bind(entry.previous_plan_id)
    .bind(entry.new_plan_id)
    .bind(entry.payment_method)
    .bind(entry.payment_amount_cents)
    .bind(entry.payment_currency)
    .bind(entry.payment_status)
    .bind(entry.transaction_id)
    .bind(entry.reason)
    .execute(&mut **tx)
    .await
    .map_err(|e| BillingError::Database(e.to_string()))?;

    Ok(())
}

fn generate_order_ref() -> String {
    format!("ord_{}", Uuid::new_v4().simple())
}

/// Where a brand-new signup opens: free plans activate on the spot with a
/// full billing cycle, paid plans wait in `trialing` for the first payment.
pub(crate) fn signup_opening(plan: &SubscriptionPlan, trial_days: i64) -> (SubscriptionStatus, i64) {
    if plan.is_free() {
        (SubscriptionStatus::Active, plan.period_length_days())
    } else {
        (SubscriptionStatus::Trialing, trial_days.max(0))
    }
}
