// Shared crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types and database plumbing for the Tradelab backend.
//!
//! Everything here is consumed by both the API server and the background
//! worker, so keep this crate free of HTTP and provider concerns.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{
    BillingCycle, HistoryAction, PaymentMethod, PaymentProviderKind, PendingSignup,
    SubscriptionHistoryEntry, SubscriptionPlan, SubscriptionStatus, UserSubscription,
};
