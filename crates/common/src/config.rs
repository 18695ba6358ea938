use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// HTTP port for the API server (default: 5000)
    pub api_port: u16,

    /// Cron expression for the renewal scan (default: "0 9 * * *")
    pub renewal_cron: String,

    /// Fixed UTC offset the scheduler operates in, e.g. "+02:00" (default: "+00:00")
    pub scheduler_utc_offset: String,

    /// Days before renewal that an alert fires (default: 3)
    pub renewal_lead_days: u32,

    /// `exact` or `catch_up` (default: catch_up)
    pub renewal_match_policy: String,

    /// Delivery attempts per subscription within one cycle (default: 3)
    pub delivery_max_attempts: u32,

    /// Base backoff between delivery attempts in milliseconds (default: 2000)
    pub delivery_backoff_ms: u64,

    /// Timeout for a single delivery attempt in seconds (default: 30)
    pub delivery_timeout_secs: u64,

    /// Concurrent deliveries within one cycle (default: 4)
    pub delivery_concurrency: usize,

    /// Cycles a renewal may fail before it stops being retried (default: 3)
    pub max_failed_cycles: u32,

    /// `resend`, `smtp` or `log`; inferred from the credentials when unset
    pub email_transport: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// SMTP relay host
    pub smtp_host: Option<String>,

    /// SMTP port (default: 587)
    pub smtp_port: u16,

    /// Use STARTTLS / implicit TLS for SMTP (default: true)
    pub smtp_tls: bool,

    pub smtp_username: Option<String>,

    pub smtp_password: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: optional("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: optional("REDIS_URL")
                .unwrap_or_else(|| "redis://localhost:6379".to_string()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            api_port: parse_or(&lookup, "API_PORT", 5000)?,
            renewal_cron: optional("RENEWAL_CRON").unwrap_or_else(|| "0 9 * * *".to_string()),
            scheduler_utc_offset: optional("SCHEDULER_UTC_OFFSET")
                .unwrap_or_else(|| "+00:00".to_string()),
            renewal_lead_days: parse_or(&lookup, "RENEWAL_LEAD_DAYS", 3)?,
            renewal_match_policy: optional("RENEWAL_MATCH_POLICY")
                .unwrap_or_else(|| "catch_up".to_string()),
            delivery_max_attempts: parse_or(&lookup, "DELIVERY_MAX_ATTEMPTS", 3)?,
            delivery_backoff_ms: parse_or(&lookup, "DELIVERY_BACKOFF_MS", 2000)?,
            delivery_timeout_secs: parse_or(&lookup, "DELIVERY_TIMEOUT_SECS", 30)?,
            delivery_concurrency: parse_or(&lookup, "DELIVERY_CONCURRENCY", 4)?,
            max_failed_cycles: parse_or(&lookup, "MAX_FAILED_CYCLES", 3)?,
            email_transport: optional("EMAIL_TRANSPORT"),
            email_from: optional("EMAIL_FROM"),
            resend_api_key: optional("RESEND_API_KEY"),
            smtp_host: optional("SMTP_HOST"),
            smtp_port: parse_or(&lookup, "SMTP_PORT", 587)?,
            smtp_tls: parse_or(&lookup, "SMTP_TLS", true)?,
            smtp_username: optional("SMTP_USERNAME"),
            smtp_password: optional("SMTP_PASSWORD"),
        })
    }
}

/// Parse an optional variable, falling back to `default` only when it is unset.
///
/// A value that is present but malformed is an error, never a silent default.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}, got '{}'",
                key,
                std::any::type_name::<T>(),
                raw
            )
        }),
        _ => Ok(default),
    }
}
