//! Core domain types shared across the Tradelab backend.
//!
//! The enums here are stored as VARCHAR columns and decoded through
//! `sqlx::Type`, so the `rename_all` attributes must stay in sync with the
//! CHECK constraints in the migrations.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// Subscription Status
// ============================================================================

/// Lifecycle state of a user subscription.
///
/// `Cancelled` and `Expired` are terminal; every other state can still move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled | SubscriptionStatus::Expired)
    }

    /// Whether a move from `self` to `next` is a legal transition.
    ///
    /// `Active -> Active` is legal: a renewal keeps the status and rolls the
    /// billing period forward.
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Trialing, Active)
                | (Trialing, Cancelled)
                | (Active, Active)
                | (Active, PastDue)
                | (Active, Cancelled)
                | (Active, Expired)
                | (PastDue, Active)
                | (PastDue, Cancelled)
                | (PastDue, Expired)
        )
    }

    pub fn valid_transitions(self) -> Vec<SubscriptionStatus> {
        use SubscriptionStatus::*;
        match self {
            Trialing => vec![Active, Cancelled],
            Active => vec![Active, PastDue, Cancelled, Expired],
            PastDue => vec![Active, Cancelled, Expired],
            Cancelled | Expired => vec![],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// ============================================================================
// Billing Cycle
// ============================================================================

/// How often a plan bills. Determines the length of each paid period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Days added to the current period on each successful payment.
    pub fn period_length_days(self) -> i64 {
        match self {
            BillingCycle::Monthly => 30,
            BillingCycle::Yearly => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" => Ok(BillingCycle::Yearly),
            _ => Err(format!("Invalid billing cycle: {}", s)),
        }
    }
}

// ============================================================================
// History Action
// ============================================================================

/// What a ledger row records. The ledger is append-only; rows are never
/// updated or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Upgrade,
    Downgrade,
    Renewal,
    Cancellation,
    Payment,
    Expiration,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Upgrade => "upgrade",
            HistoryAction::Downgrade => "downgrade",
            HistoryAction::Renewal => "renewal",
            HistoryAction::Cancellation => "cancellation",
            HistoryAction::Payment => "payment",
            HistoryAction::Expiration => "expiration",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Payment Provider
// ============================================================================

/// Payment rails we can charge through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentProviderKind {
    Stripe,
    Flutterwave,
    Nowpayments,
}

impl PaymentProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProviderKind::Stripe => "stripe",
            PaymentProviderKind::Flutterwave => "flutterwave",
            PaymentProviderKind::Nowpayments => "nowpayments",
        }
    }
}

impl fmt::Display for PaymentProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stripe" => Ok(PaymentProviderKind::Stripe),
            "flutterwave" => Ok(PaymentProviderKind::Flutterwave),
            "nowpayments" => Ok(PaymentProviderKind::Nowpayments),
            _ => Err(format!("Invalid payment provider: {}", s)),
        }
    }
}

// ============================================================================
// Database Models
// ============================================================================

/// A purchasable plan. Plans referenced by subscriptions are never hard
/// deleted; retire them by clearing `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub features: serde_json::Value,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SubscriptionPlan {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    pub fn period_length_days(&self) -> i64 {
        self.billing_cycle.period_length_days()
    }
}

/// A user's subscription row. The user's "current" subscription is the most
/// recently created one; older rows are kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reminder_sent_for: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserSubscription {
    /// Whether the subscription grants access right now. Cancellation keeps
    /// access until the already-paid period runs out; a trial only grants
    /// access inside its window. Past due keeps access through the grace
    /// period until the expiration sweep closes it.
    pub fn has_access(&self, now: OffsetDateTime) -> bool {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::PastDue => true,
            SubscriptionStatus::Trialing | SubscriptionStatus::Cancelled => {
                now < self.current_period_end
            }
            SubscriptionStatus::Expired => false,
        }
    }

    pub fn period_elapsed(&self, now: OffsetDateTime) -> bool {
        self.current_period_end < now
    }

    /// Whole days until the current period ends. Negative once elapsed.
    pub fn days_until_expiry(&self, now: OffsetDateTime) -> i64 {
        (self.current_period_end - now).whole_days()
    }
}

/// Append-only ledger entry recording a subscription change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub action_type: HistoryAction,
    pub previous_plan_id: Option<Uuid>,
    pub new_plan_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub payment_amount_cents: Option<i64>,
    pub payment_currency: Option<String>,
    pub payment_status: Option<String>,
    pub transaction_id: Option<String>,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A stored payment method. Only masked display data lives here; the raw
/// instrument stays with the provider.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub masked_data: serde_json::Value,
    pub is_default: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A signup whose first payment has not landed yet. Consumed by the webhook
/// that confirms the payment, reaped by the worker if it never does.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingSignup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub subscription_id: Uuid,
    pub provider: PaymentProviderKind,
    pub order_ref: String,
    pub provider_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub consumed_at: Option<OffsetDateTime>,
}

// ============================================================================
// Tests
// ============================================================================
