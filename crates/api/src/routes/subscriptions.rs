//! Subscription CRUD routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use subsentry_common::error::AppError;
use subsentry_common::types::{LedgerEntry, Subscription};
use subsentry_engine::subscription::{CreateSubscriptionParams, SubscriptionService};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/subs", post(create_subscription))
        .route(
            "/api/subs/{id}",
            get(list_subscriptions)
                .patch(toggle_subscription)
                .delete(delete_subscription),
        )
        .route("/api/subs/{id}/alerts", get(list_alerts))
}

/// POST /api/subs: Track a new subscription.
async fn create_subscription(
    State(state): State<AppState>,
    Json(params): Json<CreateSubscriptionParams>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let subscription = SubscriptionService::create(&state.pool, &params).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /api/subs/:user_id: List a user's subscriptions.
///
/// Shares the `{id}` segment with the per-subscription routes; here it is the
/// opaque owner reference.
async fn list_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    let subscriptions = SubscriptionService::list_by_user(&state.pool, &user_id).await?;
    Ok(Json(subscriptions))
}

/// PATCH /api/subs/:id: Pause or resume a subscription.
async fn toggle_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = SubscriptionService::toggle_active(&state.pool, id).await?;
    Ok(Json(subscription))
}

/// DELETE /api/subs/:id: Delete a subscription.
async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deleted = SubscriptionService::delete(&state.pool, id).await?;
    if deleted {
        Ok(Json(serde_json::json!({"deleted": true})))
    } else {
        Err(AppError::NotFound(format!("Subscription {} not found", id)))
    }
}

/// GET /api/subs/:id/alerts: Renewal alerts already sent for a subscription.
async fn list_alerts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    let entries = state.scheduler.ledger().entries_for(id).await?;
    Ok(Json(entries))
}
