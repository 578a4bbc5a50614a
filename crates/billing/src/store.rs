//! Plan, subscription and payment-method persistence.
//!
//! Everything here is a single-statement or small-transaction operation on
//! the pool. The multi-step lifecycle transitions (activate, cancel, expire)
//! live in [`crate::subscriptions`] because they need row locks and the
//! status-guarded update.

use serde::Deserialize;
use sqlx::PgPool;
use tradelab_shared::{
    BillingCycle, PaymentMethod, PaymentProviderKind, PendingSignup, SubscriptionHistoryEntry,
    SubscriptionPlan, UserSubscription,
};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

fn default_features() -> serde_json::Value {
    serde_json::json!({})
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub billing_cycle: BillingCycle,
    #[serde(default = "default_features")]
    pub features: serde_json::Value,
}

/// Partial plan update. `billing_cycle` and `currency` are deliberately
/// absent: changing either would silently redefine what every subscription
/// on the plan is paying for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub display_name: Option<String>,
    pub price_cents: Option<i64>,
    pub features: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Plans
    // ========================================================================

    pub async fn create_plan(&self, plan: NewPlan) -> BillingResult<SubscriptionPlan> {
        if plan.price_cents < 0 {
            return Err(BillingError::InvalidRequest(
                "plan price cannot be negative".to_string(),
            ));
        }

        let created: SubscriptionPlan = sqlx::query_as(
            r#"
            INSERT INTO subscription_plans
                (name, display_name, price_cents, currency, billing_cycle, features)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&plan.name)
        .bind(&plan.display_name)
        .bind(plan.price_cents)
        .bind(plan.currency.to_uppercase())
        .bind(plan.billing_cycle)
        .bind(&plan.features)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                BillingError::InvalidRequest(format!("plan '{}' already exists", plan.name))
            } else {
                BillingError::Database(e.to_string())
            }
        })?;

        tracing::info!(plan_id = %created.id, name = %created.name, "Created subscription plan");
        Ok(created)
    }

    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        update: PlanUpdate,
    ) -> BillingResult<SubscriptionPlan> {
        if update.price_cents.is_some_and(|p| p < 0) {
            return Err(BillingError::InvalidRequest(
                "plan price cannot be negative".to_string(),
            ));
        }

        let updated: Option<SubscriptionPlan> = sqlx::query_as(
            r#"
            UPDATE subscription_plans SET
                display_name = COALESCE($2, display_name),
                price_cents = COALESCE($3, price_cents),
                features = COALESCE($4, features),
                is_active = COALESCE($5, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(plan_id)
        .bind(update.display_name)
        .bind(update.price_cents)
        .bind(update.features)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        updated.ok_or_else(|| BillingError::NotFound(format!("plan {}", plan_id)))
    }

    /// Delete a plan that nothing references. Plans with subscriptions (even
    /// expired ones, for ledger integrity) are rejected; retire those by
    /// setting `is_active = false` instead.
    pub async fn delete_plan(&self, plan_id: Uuid) -> BillingResult<()> {
        let references: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_subscriptions WHERE plan_id = $1",
        )
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        if references > 0 {
            return Err(BillingError::PlanInUse(plan_id));
        }

        let rows_affected = sqlx::query("DELETE FROM subscription_plans WHERE id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?
            .rows_affected();

        if rows_affected == 0 {
            return Err(BillingError::NotFound(format!("plan {}", plan_id)));
        }

        tracing::info!(plan_id = %plan_id, "Deleted subscription plan");
        Ok(())
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<SubscriptionPlan> {
        let plan: Option<SubscriptionPlan> =
            sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan {}", plan_id)))
    }

    pub async fn list_plans(&self, include_inactive: bool) -> BillingResult<Vec<SubscriptionPlan>> {
        let plans: Vec<SubscriptionPlan> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_plans
            WHERE is_active = TRUE OR $1
            ORDER BY price_cents ASC
            "#,
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(plans)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// The user's current subscription: the most recently created row,
    /// whatever its status. Returns None for users who never subscribed.
    pub async fn current_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<UserSubscription>> {
        let subscription: Option<UserSubscription> = sqlx::query_as(
            r#"
            SELECT * FROM user_subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(subscription)
    }

    pub async fn get_subscription(&self, subscription_id: Uuid) -> BillingResult<UserSubscription> {
        let subscription: Option<UserSubscription> =
            sqlx::query_as("SELECT * FROM user_subscriptions WHERE id = $1")
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        subscription.ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn history_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<SubscriptionHistoryEntry>> {
        let entries: Vec<SubscriptionHistoryEntry> = sqlx::query_as(
            r#"
            SELECT * FROM user_subscription_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(entries)
    }

    // ========================================================================
    // Payment methods
    // ========================================================================

    pub async fn payment_methods(&self, user_id: Uuid) -> BillingResult<Vec<PaymentMethod>> {
        let methods: Vec<PaymentMethod> = sqlx::query_as(
            r#"
            SELECT * FROM payment_methods
            WHERE user_id = $1
            ORDER BY is_default DESC, created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(methods)
    }

    /// Record an instrument seen on a successful payment. Inserting the same
    /// masked data again is a no-op, so renewal webhooks do not pile up
    /// duplicate rows; the first method a user ever gets becomes the default.
    pub async fn record_payment_method(
        &self,
        user_id: Uuid,
        provider: PaymentProviderKind,
        masked_data: serde_json::Value,
    ) -> BillingResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payment_methods (user_id, provider, masked_data, is_default)
            SELECT $1, $2, $3,
                   NOT EXISTS (SELECT 1 FROM payment_methods WHERE user_id = $1 AND is_default)
            WHERE NOT EXISTS (
                SELECT 1 FROM payment_methods
                WHERE user_id = $1 AND provider = $2 AND masked_data = $3
            )
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(&masked_data)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?
        .rows_affected();

        if inserted > 0 {
            tracing::info!(user_id = %user_id, provider = %provider, "Recorded payment method");
        }
        Ok(inserted > 0)
    }

    /// Make `method_id` the user's default. The clear and the set run in one
    /// transaction so the partial unique index never sees two defaults.
    pub async fn set_default_payment_method(
        &self,
        user_id: Uuid,
        method_id: Uuid,
    ) -> BillingResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let owned: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM payment_methods WHERE id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(method_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        if owned.is_none() {
            return Err(BillingError::NotFound(format!(
                "payment method {}",
                method_id
            )));
        }

        sqlx::query(
            "UPDATE payment_methods SET is_default = FALSE WHERE user_id = $1 AND is_default",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        sqlx::query("UPDATE payment_methods SET is_default = TRUE WHERE id = $1")
            .bind(method_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(())
    }

    // ========================================================================
    // Pending signups
    // ========================================================================

    pub async fn find_pending_by_order_ref(
        &self,
        order_ref: &str,
    ) -> BillingResult<Option<PendingSignup>> {
        let pending: Option<PendingSignup> =
            sqlx::query_as("SELECT * FROM pending_signups WHERE order_ref = $1")
                .bind(order_ref)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(pending)
    }

    /// An unconsumed signup for this user, plan and provider, if one exists.
    /// Checkout reuses it so retries keep the same order_ref.
    pub async fn find_open_pending(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        provider: PaymentProviderKind,
    ) -> BillingResult<Option<PendingSignup>> {
        let pending: Option<PendingSignup> = sqlx::query_as(
            r#"
            SELECT * FROM pending_signups
            WHERE user_id = $1 AND plan_id = $2 AND provider = $3 AND consumed_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(pending)
    }

    pub async fn set_pending_provider_ref(
        &self,
        pending_id: Uuid,
        provider_ref: &str,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE pending_signups SET provider_ref = $2 WHERE id = $1")
            .bind(pending_id)
            .bind(provider_ref)
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        Ok(())
    }

    /// Drop unconsumed signups older than `ttl_hours`. Their subscriptions
    /// stay behind in `trialing` with an elapsed window, which grants no
    /// access; a later successful payment can still revive them.
    pub async fn reap_stale_pending(&self, ttl_hours: i64) -> BillingResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM pending_signups
            WHERE consumed_at IS NULL
              AND created_at < NOW() - ($1 || ' hours')::INTERVAL
            "#,
        )
        .bind(ttl_hours)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?
        .rows_affected();

        if deleted > 0 {
            tracing::info!(deleted = deleted, "Reaped stale pending signups");
        }
        Ok(deleted)
    }
}
