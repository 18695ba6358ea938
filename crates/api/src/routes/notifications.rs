//! Test email endpoint for checking transport configuration.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use subsentry_common::error::AppError;
use subsentry_notifier::OutgoingEmail;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/test-email", post(send_test_email))
}

#[derive(Debug, Deserialize)]
struct TestEmailRequest {
    email: String,
}

/// POST /api/test-email: Send a fixed test message through the configured transport.
async fn send_test_email(
    State(state): State<AppState>,
    Json(request): Json<TestEmailRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let to = request.email.trim();
    if to.is_empty() || !to.contains('@') {
        return Err(AppError::Validation(format!(
            "Invalid email '{}'",
            request.email
        )));
    }

    let email = OutgoingEmail::test_message(to);
    state.notifier.send(&email).await?;

    tracing::info!(to = %to, channel = state.notifier.channel_name(), "Test email sent");

    Ok(Json(json!({
        "sent": true,
        "to": to,
        "channel": state.notifier.channel_name(),
    })))
}
