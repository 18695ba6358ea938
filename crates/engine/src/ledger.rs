//! Alert deduplication ledger.
//!
//! One confirmed entry per renewal cycle key, written only after a successful
//! send. Writes are insert-if-absent on the cycle key, so two writers racing on
//! the same cycle can never both create an entry.
//!
//! Failed deliveries are tracked separately ("attempted but not confirmed") so
//! a renewal can be retried on later ticks a bounded number of times.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use subsentry_common::error::AppError;
use subsentry_common::types::{DeliveryStatus, LedgerEntry, RenewalCycleKey};

/// Result of an insert-if-absent ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    AlreadyRecorded,
}

#[async_trait::async_trait]
pub trait AlertLedger: Send + Sync {
    /// Whether a confirmed alert exists for this cycle.
    async fn has_notified(&self, key: RenewalCycleKey) -> Result<bool, AppError>;

    /// Record a confirmed delivery. Must only be called after the send succeeded.
    async fn record_notified(
        &self,
        key: RenewalCycleKey,
        notified_at: DateTime<Utc>,
        recipient: &str,
    ) -> Result<RecordOutcome, AppError>;

    /// Record a delivery that exhausted its in-cycle retries.
    async fn record_failure(
        &self,
        key: RenewalCycleKey,
        failed_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), AppError>;

    /// Number of cycles in which delivery for this key failed.
    async fn failure_count(&self, key: RenewalCycleKey) -> Result<u32, AppError>;

    /// All confirmed alerts for a subscription, newest renewal first.
    async fn entries_for(&self, subscription_id: Uuid) -> Result<Vec<LedgerEntry>, AppError>;
}

/// PostgreSQL-backed ledger (`renewal_alerts` + `renewal_alert_failures`).
#[derive(Clone)]
pub struct PgAlertLedger {
    pool: PgPool,
}

impl PgAlertLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AlertLedger for PgAlertLedger {
    async fn has_notified(&self, key: RenewalCycleKey) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM renewal_alerts
                WHERE subscription_id = $1 AND renewal_date = $2
            )
            "#,
        )
        .bind(key.subscription_id)
        .bind(key.renewal_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn record_notified(
        &self,
        key: RenewalCycleKey,
        notified_at: DateTime<Utc>,
        recipient: &str,
    ) -> Result<RecordOutcome, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO renewal_alerts (subscription_id, renewal_date, notified_at, recipient, outcome)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (subscription_id, renewal_date) DO NOTHING
            "#,
        )
        .bind(key.subscription_id)
        .bind(key.renewal_date)
        .bind(notified_at)
        .bind(recipient)
        .bind(DeliveryStatus::Sent.to_string())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            RecordOutcome::Inserted
        } else {
            RecordOutcome::AlreadyRecorded
        })
    }

    async fn record_failure(
        &self,
        key: RenewalCycleKey,
        failed_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO renewal_alert_failures (subscription_id, renewal_date, failed_at, error_detail)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(key.subscription_id)
        .bind(key.renewal_date)
        .bind(failed_at)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn failure_count(&self, key: RenewalCycleKey) -> Result<u32, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM renewal_alert_failures WHERE subscription_id = $1 AND renewal_date = $2",
        )
        .bind(key.subscription_id)
        .bind(key.renewal_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn entries_for(&self, subscription_id: Uuid) -> Result<Vec<LedgerEntry>, AppError> {
        let entries: Vec<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT subscription_id, renewal_date, notified_at, recipient, outcome
            FROM renewal_alerts
            WHERE subscription_id = $1
            ORDER BY renewal_date DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[derive(Default)]
struct MemoryLedgerState {
    entries: HashMap<RenewalCycleKey, LedgerEntry>,
    failures: HashMap<RenewalCycleKey, Vec<(DateTime<Utc>, String)>>,
}

/// In-process ledger for tests and local runs.
///
/// Reads and writes can be made to fail independently to exercise the
/// cycle-abort and reconciliation paths.
#[derive(Default)]
pub struct MemoryAlertLedger {
    state: Mutex<MemoryLedgerState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryAlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every confirmed entry, ordered by cycle key.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.cycle_key());
        entries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryLedgerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), AppError> {
        if flag.load(Ordering::SeqCst) {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl AlertLedger for MemoryAlertLedger {
    async fn has_notified(&self, key: RenewalCycleKey) -> Result<bool, AppError> {
        self.check(&self.fail_reads)?;
        Ok(self.lock().entries.contains_key(&key))
    }

    async fn record_notified(
        &self,
        key: RenewalCycleKey,
        notified_at: DateTime<Utc>,
        recipient: &str,
    ) -> Result<RecordOutcome, AppError> {
        self.check(&self.fail_writes)?;
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        state.entries.insert(
            key,
            LedgerEntry {
                subscription_id: key.subscription_id,
                renewal_date: key.renewal_date,
                notified_at,
                recipient: recipient.to_string(),
                outcome: DeliveryStatus::Sent,
            },
        );
        Ok(RecordOutcome::Inserted)
    }

    async fn record_failure(
        &self,
        key: RenewalCycleKey,
        failed_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), AppError> {
        self.check(&self.fail_writes)?;
        self.lock()
            .failures
            .entry(key)
            .or_default()
            .push((failed_at, reason.to_string()));
        Ok(())
    }

    async fn failure_count(&self, key: RenewalCycleKey) -> Result<u32, AppError> {
        self.check(&self.fail_reads)?;
        let count = self.lock().failures.get(&key).map_or(0, Vec::len);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn entries_for(&self, subscription_id: Uuid) -> Result<Vec<LedgerEntry>, AppError> {
        self.check(&self.fail_reads)?;
        let mut entries: Vec<LedgerEntry> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.renewal_date.cmp(&a.renewal_date));
        Ok(entries)
    }
}
