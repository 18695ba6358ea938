//! Validated scheduler parameters.
//!
//! Built once at startup; any invalid value aborts startup instead of falling
//! back to a default that would change how often users are alerted.

use std::time::Duration;

use subsentry_common::config::AppConfig;
use subsentry_common::error::AppError;

use crate::cadence::Cadence;
use crate::delivery::RetryPolicy;
use crate::scan::MatchPolicy;

/// Lead times beyond a year are almost certainly a typo.
const MAX_LEAD_DAYS: u32 = 365;

/// Extra claim lifetime on top of the worst-case delivery time.
const CLAIM_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cadence: Cadence,
    pub lead_days: u32,
    pub match_policy: MatchPolicy,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub max_failed_cycles: u32,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let settings = Self {
            cadence: Cadence::parse(&config.renewal_cron, &config.scheduler_utc_offset)?,
            lead_days: config.renewal_lead_days,
            match_policy: config.renewal_match_policy.parse()?,
            retry: RetryPolicy {
                max_attempts: config.delivery_max_attempts,
                base_backoff: Duration::from_millis(config.delivery_backoff_ms),
                attempt_timeout: Duration::from_secs(config.delivery_timeout_secs),
            },
            concurrency: config.delivery_concurrency,
            max_failed_cycles: config.max_failed_cycles,
        };
        settings.validate()?;

        tracing::info!(
            cron = settings.cadence.expression(),
            utc_offset = %settings.cadence.offset(),
            lead_days = settings.lead_days,
            match_policy = %settings.match_policy,
            max_attempts = settings.retry.max_attempts,
            concurrency = settings.concurrency,
            "Scheduler settings loaded"
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.lead_days > MAX_LEAD_DAYS {
            return Err(AppError::Config(format!(
                "RENEWAL_LEAD_DAYS must be at most {}, got {}",
                MAX_LEAD_DAYS, self.lead_days
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "DELIVERY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(AppError::Config(
                "DELIVERY_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(AppError::Config(
                "DELIVERY_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.max_failed_cycles == 0 {
            return Err(AppError::Config(
                "MAX_FAILED_CYCLES must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// How long a delivery claim lives: the full retry budget plus a margin.
    pub fn claim_ttl(&self) -> Duration {
        self.retry.worst_case().saturating_add(CLAIM_MARGIN)
    }
}
