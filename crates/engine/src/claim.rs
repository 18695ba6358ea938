//! Delivery claims: short-lived leases on a renewal cycle key.
//!
//! Before a worker sends an alert it claims the cycle key. Only one claim can
//! exist per key until it is released or expires, so two scheduler replicas
//! (or a scheduled tick overlapping a manual trigger) cannot both send.
//!
//! Uses Redis `SET NX EX` for atomic check-and-set with automatic TTL expiry.
//! The TTL must outlive the whole retry budget of one delivery.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;

use subsentry_common::error::AppError;
use subsentry_common::types::RenewalCycleKey;

#[async_trait::async_trait]
pub trait DeliveryClaims: Send + Sync {
    /// Try to take the claim. Returns `false` if someone else holds it.
    async fn try_claim(&self, key: RenewalCycleKey, ttl: Duration) -> Result<bool, AppError>;

    /// Drop a claim so the key can be attempted again.
    async fn release(&self, key: RenewalCycleKey) -> Result<(), AppError>;
}

/// Redis-backed claims shared by every scheduler instance.
#[derive(Clone)]
pub struct RedisDeliveryClaims {
    redis: ConnectionManager,
}

impl RedisDeliveryClaims {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn redis_key(key: RenewalCycleKey) -> String {
        format!(
            "renewal:claim:{}:{}",
            key.subscription_id, key.renewal_date
        )
    }
}

#[async_trait::async_trait]
impl DeliveryClaims for RedisDeliveryClaims {
    async fn try_claim(&self, key: RenewalCycleKey, ttl: Duration) -> Result<bool, AppError> {
        let mut redis = self.redis.clone();
        let ttl_secs = ttl.as_secs().max(1);

        // SET key "1" NX EX ttl_secs
        // Returns Some("OK") if key was set (claim taken)
        // Returns None if key already exists (claimed elsewhere)
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut redis)
            .await?;

        let claimed = result.is_some();
        if !claimed {
            tracing::debug!(cycle = %key, "Delivery already claimed by another worker");
        }

        Ok(claimed)
    }

    async fn release(&self, key: RenewalCycleKey) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::redis_key(key))
            .query_async(&mut redis)
            .await?;
        Ok(())
    }
}

/// In-process claims for tests and single-instance runs.
#[derive(Default)]
pub struct MemoryDeliveryClaims {
    held: Mutex<HashMap<RenewalCycleKey, Instant>>,
}

impl MemoryDeliveryClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live claim exists for the key.
    pub fn is_claimed(&self, key: RenewalCycleKey) -> bool {
        self.lock()
            .get(&key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RenewalCycleKey, Instant>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl DeliveryClaims for MemoryDeliveryClaims {
    async fn try_claim(&self, key: RenewalCycleKey, ttl: Duration) -> Result<bool, AppError> {
        let now = Instant::now();
        let mut held = self.lock();
        match held.get(&key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                held.insert(key, now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: RenewalCycleKey) -> Result<(), AppError> {
        self.lock().remove(&key);
        Ok(())
    }
}
