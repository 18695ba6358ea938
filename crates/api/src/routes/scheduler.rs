//! Manual renewal scan trigger.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;

use subsentry_common::error::AppError;
use subsentry_engine::CycleSummary;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/scheduler/run", post(run_scan))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunScanRequest {
    /// Scan as if today were this date (operating offset).
    as_of: Option<NaiveDate>,
}

/// POST /api/scheduler/run: Run exactly one scan cycle and report what it did.
///
/// The body is optional; an empty body scans for today.
async fn run_scan(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CycleSummary>, AppError> {
    let request: RunScanRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunScanRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid scan request: {}", e)))?
    };

    if state.scheduler.is_shutting_down() {
        return Err(AppError::Internal("Scheduler is shutting down".to_string()));
    }

    let summary = state.scheduler.trigger(request.as_of).await?;
    Ok(Json(summary))
}
