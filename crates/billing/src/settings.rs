//! Runtime-tunable billing settings.
//!
//! Operational knobs live in the `app_settings` table as JSON values and can
//! be changed without a deploy. Reads fall back to the environment-derived
//! defaults when a key has never been written, and to the same defaults when
//! a stored value has the wrong shape, so a bad write can not stall a sweep.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};

/// Days before `current_period_end` at which renewal reminders go out.
pub const REMINDER_WINDOW_DAYS: &str = "billing.reminder_window_days";
/// Trial window granted to paid signups before the first payment lands.
pub const SIGNUP_TRIAL_DAYS: &str = "billing.signup_trial_days";
/// Age after which unconsumed pending signups are reaped.
pub const PENDING_SIGNUP_TTL_HOURS: &str = "billing.pending_signup_ttl_hours";

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppSetting {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SettingsDefaults {
    pub reminder_window_days: i64,
    pub signup_trial_days: i64,
    pub pending_signup_ttl_hours: i64,
}

impl SettingsDefaults {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            reminder_window_days: config.reminder_window_days,
            signup_trial_days: config.signup_trial_days,
            pending_signup_ttl_hours: config.pending_signup_ttl_hours,
        }
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
    defaults: SettingsDefaults,
}

impl SettingsStore {
    pub fn new(pool: PgPool, defaults: SettingsDefaults) -> Self {
        Self { pool, defaults }
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    pub async fn get_raw(&self, key: &str) -> BillingResult<Option<serde_json::Value>> {
        sqlx::query_scalar("SELECT value FROM app_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))
    }

    pub async fn set(&self, key: &str, value: serde_json::Value) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(key, %value, "Setting updated");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> BillingResult<bool> {
        let rows_affected = sqlx::query("DELETE FROM app_settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    pub async fn list(&self) -> BillingResult<Vec<AppSetting>> {
        sqlx::query_as("SELECT * FROM app_settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))
    }

    // ========================================================================
    // Typed accessors
    // ========================================================================

    pub async fn reminder_window_days(&self) -> BillingResult<i64> {
        let raw = self.get_raw(REMINDER_WINDOW_DAYS).await?;
        Ok(int_setting(
            raw.as_ref(),
            REMINDER_WINDOW_DAYS,
            self.defaults.reminder_window_days,
        ))
    }

    pub async fn signup_trial_days(&self) -> BillingResult<i64> {
        let raw = self.get_raw(SIGNUP_TRIAL_DAYS).await?;
        Ok(int_setting(
            raw.as_ref(),
            SIGNUP_TRIAL_DAYS,
            self.defaults.signup_trial_days,
        ))
    }

    pub async fn pending_signup_ttl_hours(&self) -> BillingResult<i64> {
        let raw = self.get_raw(PENDING_SIGNUP_TTL_HOURS).await?;
        Ok(int_setting(
            raw.as_ref(),
            PENDING_SIGNUP_TTL_HOURS,
            self.defaults.pending_signup_ttl_hours,
        ))
    }
}

fn int_setting(raw: Option<&serde_json::Value>, key: &str, default: i64) -> i64 {
    match raw {
        None => default,
        Some(value) => match value.as_i64() {
            Some(n) => n,
            None => {
                tracing::warn!(key, %value, default, "Setting is not an integer; using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_setting_falls_back_to_default() {
        assert_eq!(int_setting(None, REMINDER_WINDOW_DAYS, 3), 3);
    }

    #[test]
    fn stored_integer_wins_over_default() {
        let value = json!(7);
        assert_eq!(int_setting(Some(&value), REMINDER_WINDOW_DAYS, 3), 7);
    }

    #[test]
    fn malformed_setting_falls_back_to_default() {
        let value = json!("seven");
        assert_eq!(int_setting(Some(&value), REMINDER_WINDOW_DAYS, 3), 3);
    }
}
