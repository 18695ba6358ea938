//! Bounded-retry delivery of a single alert.
//!
//! Every attempt runs under a timeout. Between attempts the worker backs off
//! exponentially (or for the transport's requested `Retry-After`), capped at
//! [`MAX_BACKOFF`]. A shutdown signal during backoff abandons the remaining
//! attempts and reports [`DeliveryOutcome::Cancelled`]; an attempt already in
//! flight is allowed to finish.

use std::time::Duration;

use tokio::sync::watch;

use subsentry_notifier::{Notifier, NotifyError, OutgoingEmail};

/// Upper bound for any single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// In-cycle retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff after the `failed_attempts`-th failure (1-based).
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }

    /// Longest a full delivery can take: every attempt timing out and every
    /// pause hitting the cap (a rate-limited transport may ask for that much).
    pub fn worst_case(&self) -> Duration {
        let attempts = self.attempt_timeout.saturating_mul(self.max_attempts);
        let pauses = MAX_BACKOFF.saturating_mul(self.max_attempts.saturating_sub(1));
        attempts.saturating_add(pauses)
    }
}

/// Final result of delivering one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, last_error: String },
    /// Shutdown arrived during a backoff. Not a transport failure.
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Resolve once `true` has been published on the shutdown channel.
///
/// A dropped sender never resolves: nobody is left to ask for a shutdown.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Send `email`, retrying transient failures per `policy`.
pub async fn deliver_with_retry(
    notifier: &dyn Notifier,
    email: &OutgoingEmail,
    policy: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.attempt_timeout, notifier.send(email)).await
        {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(policy.attempt_timeout)),
        };

        let err = match result {
            Ok(()) => return DeliveryOutcome::Delivered { attempts: attempt },
            Err(err) => err,
        };

        if err.is_permanent() || attempt >= max_attempts {
            return DeliveryOutcome::Failed {
                attempts: attempt,
                last_error: err.to_string(),
            };
        }

        let delay = match err {
            NotifyError::RateLimited { retry_after_secs } => {
                Duration::from_secs(retry_after_secs).min(MAX_BACKOFF)
            }
            _ => policy.backoff_for(attempt),
        };

        tracing::debug!(
            to = %email.to,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Delivery attempt failed, backing off"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(shutdown) => {
                tracing::debug!(to = %email.to, attempt, error = %err, "Shutdown during retry backoff");
                return DeliveryOutcome::Cancelled { attempts: attempt };
            }
        }
    }
}
