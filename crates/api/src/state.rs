//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use tradelab_billing::BillingService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: Arc<BillingService>) -> Self {
        let providers = billing.checkout.configured_providers();
        if providers.is_empty() {
            tracing::warn!("No payment providers configured - checkout will reject every request");
        } else {
            tracing::info!(providers = ?providers, "Payment providers configured");
        }

        Self {
            pool,
            config,
            billing,
        }
    }
}
