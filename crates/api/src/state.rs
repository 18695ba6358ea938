//! Shared application state for the Axum API server.

use std::sync::Arc;

use sqlx::PgPool;

use subsentry_engine::RenewalScheduler;
use subsentry_notifier::Notifier;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub scheduler: Arc<RenewalScheduler>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        scheduler: Arc<RenewalScheduler>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pool,
            scheduler,
            notifier,
        }
    }
}
