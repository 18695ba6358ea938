//! Subscription service: CRUD operations for tracked subscriptions.
//!
//! The renewal scheduler never writes through this service; it only reads
//! active subscriptions via [`SubscriptionService::find_active_renewing_between`].

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use subsentry_common::error::AppError;
use subsentry_common::types::{Subscription, parse_cost_cents};

/// Service layer for subscription CRUD operations.
pub struct SubscriptionService;

/// A cost as sent by clients: either a JSON number or a decimal string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CostInput {
    Number(serde_json::Number),
    Text(String),
}

impl CostInput {
    pub fn to_cents(&self) -> Result<i64, AppError> {
        match self {
            CostInput::Number(n) => parse_cost_cents(&n.to_string()),
            CostInput::Text(s) => parse_cost_cents(s),
        }
    }
}

/// Parameters for creating a new subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionParams {
    pub user_id: String,
    pub user_email: String,
    pub name: String,
    pub cost: CostInput,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub renewal_date: NaiveDate,
}

/// Validated, normalized fields ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub user_id: String,
    pub user_email: String,
    pub name: String,
    pub cost_cents: i64,
    pub currency: String,
    pub category: String,
    pub renewal_date: NaiveDate,
}

impl CreateSubscriptionParams {
    pub fn validate(&self) -> Result<NewSubscription, AppError> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::Validation("user_id is required".to_string()));
        }

        let user_email = self.user_email.trim();
        if !is_plausible_email(user_email) {
            return Err(AppError::Validation(format!(
                "Invalid user_email '{}'",
                self.user_email
            )));
        }

        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        let currency = self
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("USD")
            .to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::Validation(format!(
                "Invalid currency '{}': expected a 3-letter code",
                currency
            )));
        }

        let category = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("General")
            .to_string();

        Ok(NewSubscription {
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
            name: name.to_string(),
            cost_cents: self.cost.to_cents()?,
            currency,
            category,
            renewal_date: self.renewal_date,
        })
    }
}

fn is_plausible_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

impl SubscriptionService {
    /// Create a new subscription (active by default).
    pub async fn create(
        pool: &PgPool,
        params: &CreateSubscriptionParams,
    ) -> Result<Subscription, AppError> {
        let new = params.validate()?;
        let id = Uuid::new_v4();

        let sub: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, user_id, user_email, name, cost_cents, currency, category, renewal_date, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&new.user_id)
        .bind(&new.user_email)
        .bind(&new.name)
        .bind(new.cost_cents)
        .bind(&new.currency)
        .bind(&new.category)
        .bind(new.renewal_date)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            subscription_id = %sub.id,
            user_id = %sub.user_id,
            renewal_date = %sub.renewal_date,
            "Subscription created"
        );

        Ok(sub)
    }

    /// List all subscriptions for a user, soonest renewal first.
    pub async fn list_by_user(pool: &PgPool, user_id: &str) -> Result<Vec<Subscription>, AppError> {
        let subs: Vec<Subscription> = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY renewal_date ASC, created_at ASC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(subs)
    }

    /// Flip a subscription between active and paused.
    pub async fn toggle_active(
        pool: &PgPool,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        let sub: Subscription = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET active = NOT active, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", subscription_id)))?;

        tracing::info!(
            subscription_id = %subscription_id,
            active = sub.active,
            "Subscription toggled"
        );

        Ok(sub)
    }

    /// Delete a subscription. Returns true if it was deleted.
    pub async fn delete(pool: &PgPool, subscription_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .execute(pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(subscription_id = %subscription_id, "Subscription deleted");
        }

        Ok(deleted)
    }

    /// Active subscriptions renewing within `[from, to]`, inclusive.
    /// Used by the renewal scan.
    pub async fn find_active_renewing_between(
        pool: &PgPool,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let subs: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT *
            FROM subscriptions
            WHERE active = true
              AND renewal_date BETWEEN $1 AND $2
            ORDER BY renewal_date ASC, id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?;

        Ok(subs)
    }
}
