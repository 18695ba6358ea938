//! SMTP email notifier via `lettre` with TLS support.
//!
//! Supports STARTTLS (port 587 and friends), implicit TLS (port 465) and,
//! for local relays only, plaintext.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::traits::{Notifier, NotifyError, OutgoingEmail};

/// Connection settings for an SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Sends alerts as emails via SMTP.
#[derive(Debug)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build the transport. Nothing is contacted until the first send.
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        // Port 465 uses implicit TLS; everything else uses STARTTLS when TLS is enabled.
        let mut builder = if settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(settings.port)
        } else if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(settings.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
        };

        match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            (None, None) => {}
            _ => {
                return Err(NotifyError::Config(
                    "SMTP_USERNAME and SMTP_PASSWORD must be set together".to_string(),
                ));
            }
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .body(email.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::info!(
            channel = "smtp",
            to = %email.to,
            subject = %email.subject,
            "notification delivered"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "smtp"
    }
}
