//! Email delivery through the Resend HTTP API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use crate::traits::{Notifier, NotifyError, OutgoingEmail};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Default backoff hint when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// Sends alerts through Resend.
#[derive(Debug, Clone)]
pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl ResendNotifier {
    pub fn new(api_key: &str, from: &str) -> Result<Self, NotifyError> {
        if api_key.trim().is_empty() {
            return Err(NotifyError::Config("RESEND_API_KEY is empty".to_string()));
        }
        if !from.contains('@') {
            return Err(NotifyError::Config(format!(
                "EMAIL_FROM '{}' is not an email address",
                from
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            from: from.to_string(),
            endpoint: RESEND_API_URL.to_string(),
        })
    }

    /// Point the notifier at a different endpoint (self-hosted relay, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait::async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let request = ResendRequest {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            text: &email.body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(NotifyError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        tracing::info!(
            channel = "resend",
            to = %email.to,
            subject = %email.subject,
            "notification delivered"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "resend"
    }
}
