//! Read side of the subscription store, as seen by the renewal scan.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use subsentry_common::error::AppError;
use subsentry_common::types::Subscription;

use crate::subscription::SubscriptionService;

/// Query capability the scheduler needs from the subscription store.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Active subscriptions with `from <= renewal_date <= to`.
    async fn find_active_renewing(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn find_active_renewing(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        SubscriptionService::find_active_renewing_between(&self.pool, from, to).await
    }
}

/// In-process store for tests and local runs.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    subscriptions: Mutex<Vec<Subscription>>,
    unavailable: AtomicBool,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriptions(subscriptions: Vec<Subscription>) -> Self {
        Self {
            subscriptions: Mutex::new(subscriptions),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, subscription: Subscription) {
        self.lock().push(subscription);
    }

    /// Set the active flag. Returns false if the subscription is unknown.
    pub fn set_active(&self, id: Uuid, active: bool) -> bool {
        match self.lock().iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.active = active;
                true
            }
            None => false,
        }
    }

    /// Simulate the backing database going away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn find_active_renewing(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut subs: Vec<Subscription> = self
            .lock()
            .iter()
            .filter(|s| s.active && s.renewal_date >= from && s.renewal_date <= to)
            .cloned()
            .collect();
        subs.sort_by_key(|s| (s.renewal_date, s.id));
        Ok(subs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sub(date: NaiveDate, active: bool) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id: "user".to_string(),
            user_email: "user@example.com".to_string(),
            name: "Spotify".to_string(),
            cost_cents: 1099,
            currency: "USD".to_string(),
            category: "Music".to_string(),
            renewal_date: date,
            active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_filters_window_and_active() {
        let store = MemorySubscriptionStore::with_subscriptions(vec![
            sub(date(1), true),
            sub(date(3), true),
            sub(date(3), false),
            sub(date(5), true),
        ]);

        let found = store.find_active_renewing(date(2), date(4)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].renewal_date, date(3));
        assert!(found[0].active);
    }

    #[tokio::test]
    async fn test_memory_store_set_active() {
        let paused = sub(date(3), true);
        let id = paused.id;
        let store = MemorySubscriptionStore::with_subscriptions(vec![paused]);

        assert!(store.set_active(id, false));
        assert!(!store.set_active(Uuid::new_v4(), false));
        assert!(store
            .find_active_renewing(date(1), date(31))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_unavailable() {
        let store = MemorySubscriptionStore::new();
        store.set_unavailable(true);
        let err = store
            .find_active_renewing(date(1), date(2))
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }
}
