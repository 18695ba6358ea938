//! Notifier trait definition and shared error types.

use std::time::Duration;

use subsentry_common::error::AppError;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Delivery rejected with status {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl NotifyError {
    /// Errors that another attempt cannot fix: bad configuration, or a 4xx
    /// from the provider other than 408 and 429.
    pub fn is_permanent(&self) -> bool {
        match self {
            NotifyError::Config(_) => true,
            NotifyError::Rejected { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }
}

impl From<NotifyError> for AppError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Config(msg) => AppError::Config(msg),
            other => AppError::Notify(other.to_string()),
        }
    }
}

/// An email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Connectivity check message used by the operator test endpoint.
    pub fn test_message(to: impl Into<String>) -> Self {
        Self::new(
            to,
            "Test Alert: Subscription Audit",
            "If you are reading this, your email system is working perfectly!",
        )
    }
}

/// A delivery transport. Failure is an ordinary outcome, not a crash.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one email through this channel.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "smtp", "resend").
    fn channel_name(&self) -> &str;
}
