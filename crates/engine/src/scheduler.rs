//! Renewal alert scheduler.
//!
//! One scan cycle:
//! 1. Find due subscriptions for the scan day (via `RenewalScanner`)
//! 2. Skip cycle keys already confirmed in the ledger, or failed too many times
//! 3. For the rest, on a bounded worker pool: claim → re-check → deliver with retry
//! 4. Record confirmed deliveries (insert-if-absent) and failed attempts
//!
//! The periodic loop and the manual trigger both go through [`RenewalScheduler::run_cycle`].

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use redis::aio::ConnectionManager;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use subsentry_common::error::AppError;
use subsentry_common::types::Subscription;
use subsentry_notifier::Notifier;

use crate::alert::renewal_alert;
use crate::claim::{DeliveryClaims, RedisDeliveryClaims};
use crate::delivery::{DeliveryOutcome, RetryPolicy, deliver_with_retry, shutdown_requested};
use crate::ledger::{AlertLedger, PgAlertLedger, RecordOutcome};
use crate::scan::RenewalScanner;
use crate::settings::SchedulerSettings;
use crate::store::{PgSubscriptionStore, SubscriptionStore};

/// Counts reported at the end of a scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub as_of: Option<NaiveDate>,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub due: usize,
    pub skipped_already_notified: usize,
    pub skipped_in_flight: usize,
    pub skipped_exhausted: usize,
    pub sent: usize,
    pub failed: usize,
    pub reconciliation_needed: usize,
    /// Shutdown stopped the cycle before every due subscription was dispatched,
    /// or abandoned a delivery during its retry backoff.
    pub cancelled: bool,
}

impl CycleSummary {
    fn record(&mut self, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::Sent => self.sent += 1,
            WorkerOutcome::AlreadyNotified => self.skipped_already_notified += 1,
            WorkerOutcome::ClaimedElsewhere => self.skipped_in_flight += 1,
            WorkerOutcome::Failed => self.failed += 1,
            WorkerOutcome::ReconciliationNeeded => self.reconciliation_needed += 1,
            WorkerOutcome::Cancelled => self.cancelled = true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerOutcome {
    Sent,
    AlreadyNotified,
    ClaimedElsewhere,
    Failed,
    ReconciliationNeeded,
    Cancelled,
}

/// Everything a delivery task needs, cheap to clone into the task.
#[derive(Clone)]
struct DeliveryWorker {
    ledger: Arc<dyn AlertLedger>,
    claims: Arc<dyn DeliveryClaims>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    claim_ttl: std::time::Duration,
    shutdown: watch::Receiver<bool>,
}

impl DeliveryWorker {
    async fn deliver(mut self, sub: Subscription) -> Result<WorkerOutcome, AppError> {
        let key = sub.cycle_key();

        if !self.claims.try_claim(key, self.claim_ttl).await? {
            return Ok(WorkerOutcome::ClaimedElsewhere);
        }

        // Another instance may have confirmed this cycle and dropped its claim
        // between our first check and taking the claim.
        match self.ledger.has_notified(key).await {
            Ok(false) => {}
            Ok(true) => {
                self.release(&sub).await;
                return Ok(WorkerOutcome::AlreadyNotified);
            }
            Err(e) => {
                self.release(&sub).await;
                return Err(e);
            }
        }

        let email = renewal_alert(&sub);
        let outcome =
            deliver_with_retry(self.notifier.as_ref(), &email, &self.retry, &mut self.shutdown)
                .await;

        match outcome {
            DeliveryOutcome::Delivered { attempts } => {
                // The claim is left to expire so nobody re-sends while the record is pending.
                match self
                    .ledger
                    .record_notified(key, Utc::now(), &sub.user_email)
                    .await
                {
                    Ok(RecordOutcome::Inserted) => {
                        tracing::info!(
                            subscription_id = %sub.id,
                            renewal_date = %sub.renewal_date,
                            attempts,
                            "Renewal alert sent"
                        );
                        Ok(WorkerOutcome::Sent)
                    }
                    Ok(RecordOutcome::AlreadyRecorded) => {
                        tracing::warn!(
                            event = "duplicate_delivery",
                            subscription_id = %sub.id,
                            renewal_date = %sub.renewal_date,
                            "Renewal alert sent but cycle was already recorded by another worker"
                        );
                        Ok(WorkerOutcome::Sent)
                    }
                    Err(e) => {
                        tracing::error!(
                            event = "reconciliation_needed",
                            subscription_id = %sub.id,
                            renewal_date = %sub.renewal_date,
                            recipient = %sub.user_email,
                            error = %e,
                            "Renewal alert delivered but ledger write failed; a duplicate may be sent"
                        );
                        Ok(WorkerOutcome::ReconciliationNeeded)
                    }
                }
            }
            DeliveryOutcome::Failed {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    event = "delivery_failed",
                    subscription_id = %sub.id,
                    renewal_date = %sub.renewal_date,
                    attempts,
                    error = %last_error,
                    "Renewal alert delivery failed"
                );

                if let Err(e) = self
                    .ledger
                    .record_failure(key, Utc::now(), &last_error)
                    .await
                {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        error = %e,
                        "Failed to record delivery failure"
                    );
                }
                self.release(&sub).await;
                Ok(WorkerOutcome::Failed)
            }
            DeliveryOutcome::Cancelled { attempts } => {
                tracing::info!(
                    subscription_id = %sub.id,
                    renewal_date = %sub.renewal_date,
                    attempts,
                    "Renewal alert abandoned for shutdown; retried next cycle"
                );
                self.release(&sub).await;
                Ok(WorkerOutcome::Cancelled)
            }
        }
    }

    async fn release(&self, sub: &Subscription) {
        if let Err(e) = self.claims.release(sub.cycle_key()).await {
            tracing::warn!(
                subscription_id = %sub.id,
                error = %e,
                "Failed to release delivery claim; it will expire on its own"
            );
        }
    }
}

/// Drives renewal scans on a cadence and on demand.
pub struct RenewalScheduler {
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn AlertLedger>,
    claims: Arc<dyn DeliveryClaims>,
    notifier: Arc<dyn Notifier>,
    scanner: RenewalScanner,
    settings: SchedulerSettings,
    shutdown_tx: watch::Sender<bool>,
}

impl RenewalScheduler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn AlertLedger>,
        claims: Arc<dyn DeliveryClaims>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            ledger,
            claims,
            notifier,
            scanner: RenewalScanner::new(settings.lead_days, settings.match_policy),
            settings,
            shutdown_tx,
        }
    }

    /// Wire the production backends: Postgres store + ledger, Redis claims.
    pub fn with_backends(
        pool: PgPool,
        redis: ConnectionManager,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self::new(
            Arc::new(PgSubscriptionStore::new(pool.clone())),
            Arc::new(PgAlertLedger::new(pool)),
            Arc::new(RedisDeliveryClaims::new(redis)),
            notifier,
            settings,
        )
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<dyn AlertLedger> {
        &self.ledger
    }

    /// Ask the loop and any running cycle to stop. In-flight sends finish.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run one cycle now. `as_of` defaults to today in the operating offset.
    pub async fn trigger(&self, as_of: Option<NaiveDate>) -> Result<CycleSummary, AppError> {
        let today = as_of.unwrap_or_else(|| self.settings.cadence.today(Utc::now()));
        tracing::info!(as_of = %today, "Manual renewal scan triggered");
        self.run_cycle(today).await
    }

    /// Execute one scan cycle for `today`.
    ///
    /// Store or ledger read failures abort the cycle with `Err` once in-flight
    /// deliveries have drained; delivery failures never do.
    pub async fn run_cycle(&self, today: NaiveDate) -> Result<CycleSummary, AppError> {
        let (window_start, window_end) = self.scanner.window(today);
        tracing::info!(
            event = "cycle_started",
            as_of = %today,
            window_start = %window_start,
            window_end = %window_end,
            "Running renewal scan"
        );

        let result = self.execute_cycle(today).await;

        match &result {
            Ok(summary) => tracing::info!(
                event = "cycle_completed",
                as_of = %today,
                due = summary.due,
                skipped_already_notified = summary.skipped_already_notified,
                skipped_in_flight = summary.skipped_in_flight,
                skipped_exhausted = summary.skipped_exhausted,
                sent = summary.sent,
                failed = summary.failed,
                reconciliation_needed = summary.reconciliation_needed,
                cancelled = summary.cancelled,
                "Renewal scan completed"
            ),
            Err(e) => tracing::error!(
                event = "cycle_failed",
                as_of = %today,
                error = %e,
                "Renewal scan aborted; next tick retries from scratch"
            ),
        }

        result
    }

    async fn execute_cycle(&self, today: NaiveDate) -> Result<CycleSummary, AppError> {
        let (window_start, window_end) = self.scanner.window(today);
        let due = self.scanner.find_due(self.store.as_ref(), today).await?;

        let mut summary = CycleSummary {
            as_of: Some(today),
            window_start: Some(window_start),
            window_end: Some(window_end),
            due: due.len(),
            ..CycleSummary::default()
        };

        let worker = DeliveryWorker {
            ledger: self.ledger.clone(),
            claims: self.claims.clone(),
            notifier: self.notifier.clone(),
            retry: self.settings.retry,
            claim_ttl: self.settings.claim_ttl(),
            shutdown: self.shutdown_tx.subscribe(),
        };
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut workers = JoinSet::new();
        let mut abort: Option<AppError> = None;

        for sub in due {
            if self.is_shutting_down() {
                summary.cancelled = true;
                break;
            }

            let key = sub.cycle_key();
            match self.ledger.has_notified(key).await {
                Ok(true) => {
                    tracing::debug!(cycle = %key, "Already notified for this renewal");
                    summary.skipped_already_notified += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            }

            match self.ledger.failure_count(key).await {
                Ok(failures) if failures >= self.settings.max_failed_cycles => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        renewal_date = %sub.renewal_date,
                        failures,
                        "Giving up on renewal alert after repeated failed cycles"
                    );
                    summary.skipped_exhausted += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    abort = Some(AppError::Internal(format!("worker pool closed: {}", e)));
                    break;
                }
            };

            let worker = worker.clone();
            workers.spawn(async move {
                let _permit = permit;
                worker.deliver(sub).await
            });
        }

        // Drain every in-flight delivery before returning, even when aborting,
        // so no send is cut off between success and its ledger write.
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(outcome)) => summary.record(outcome),
                Ok(Err(e)) => {
                    if abort.is_none() {
                        abort = Some(e);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Delivery worker panicked");
                    summary.failed += 1;
                }
            }
        }

        match abort {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Run scan cycles on the cadence until [`Self::shutdown`] is called.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        let cadence = &self.settings.cadence;

        tracing::info!(
            cron = cadence.expression(),
            utc_offset = %cadence.offset(),
            lead_days = self.settings.lead_days,
            "Renewal scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let next = cadence.next_after(now).ok_or_else(|| {
                anyhow::anyhow!("cron expression '{}' has no upcoming ticks", cadence.expression())
            })?;
            let wait = (next.with_timezone(&Utc) - now).to_std().unwrap_or_default();

            tracing::info!(next_tick = %next, "Waiting for next renewal scan");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            let today = cadence.today(Utc::now());
            // Failures are logged inside; the next tick starts from scratch.
            let _ = self.run_cycle(today).await;
        }

        tracing::info!("Renewal scheduler stopped");
        Ok(())
    }
}
