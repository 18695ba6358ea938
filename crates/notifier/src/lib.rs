//! Notification delivery channels for renewal alerts.
//!
//! The scheduler only sees the [`Notifier`] trait; the concrete transport is
//! chosen once at startup by [`build_notifier`] and injected.

pub mod dry_run;
pub mod resend;
pub mod smtp;
pub mod traits;

use std::sync::Arc;

use subsentry_common::config::AppConfig;

pub use crate::dry_run::LogNotifier;
pub use crate::resend::ResendNotifier;
pub use crate::smtp::{SmtpNotifier, SmtpSettings};
pub use crate::traits::{Notifier, NotifyError, OutgoingEmail};

/// Select and build the configured transport.
///
/// `EMAIL_TRANSPORT` wins when set; otherwise Resend is used if an API key is
/// present, then SMTP if a host is present. No transport is a configuration
/// error rather than a silent dry run.
pub fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    let transport = match config.email_transport.as_deref() {
        Some(t) => t.trim().to_ascii_lowercase(),
        None if config.resend_api_key.is_some() => "resend".to_string(),
        None if config.smtp_host.is_some() => "smtp".to_string(),
        None => {
            return Err(NotifyError::Config(
                "no email transport configured: set EMAIL_TRANSPORT, RESEND_API_KEY or SMTP_HOST"
                    .to_string(),
            ));
        }
    };

    let notifier: Arc<dyn Notifier> = match transport.as_str() {
        "resend" => {
            let api_key = config
                .resend_api_key
                .as_deref()
                .ok_or_else(|| NotifyError::Config("RESEND_API_KEY is required".to_string()))?;
            Arc::new(ResendNotifier::new(api_key, require_from(config)?)?)
        }
        "smtp" => {
            let host = config
                .smtp_host
                .clone()
                .ok_or_else(|| NotifyError::Config("SMTP_HOST is required".to_string()))?;
            Arc::new(SmtpNotifier::from_settings(&SmtpSettings {
                host,
                port: config.smtp_port,
                tls: config.smtp_tls,
                from: require_from(config)?.to_string(),
                username: config.smtp_username.clone(),
                password: config.smtp_password.clone(),
            })?)
        }
        "log" => Arc::new(LogNotifier::new()),
        other => {
            return Err(NotifyError::Config(format!(
                "unknown EMAIL_TRANSPORT '{}' (expected resend, smtp or log)",
                other
            )));
        }
    };

    tracing::info!(channel = notifier.channel_name(), "Notification transport ready");
    Ok(notifier)
}

fn require_from(config: &AppConfig) -> Result<&str, NotifyError> {
    config
        .email_from
        .as_deref()
        .ok_or_else(|| NotifyError::Config("EMAIL_FROM is required".to_string()))
}
