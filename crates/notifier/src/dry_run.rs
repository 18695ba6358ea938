//! Dry-run notifier that only logs what it would have sent.

use crate::traits::{Notifier, NotifyError, OutgoingEmail};

#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        tracing::info!(
            channel = "log",
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "notification logged (dry run)"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
