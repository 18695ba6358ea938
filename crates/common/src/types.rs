use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Notification delivery outcome recorded in the alert ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Sent => write!(f, "sent"),
        }
    }
}

/// A tracked recurring commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    /// Opaque owner reference supplied by the identity provider
    pub user_id: String,
    /// Contact address; used only for alert delivery
    pub user_email: String,
    pub name: String,
    /// Cost in minor currency units (cents)
    pub cost_cents: i64,
    pub currency: String,
    pub category: String,
    pub renewal_date: NaiveDate,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// The renewal cycle this subscription is currently in.
    pub fn cycle_key(&self) -> RenewalCycleKey {
        RenewalCycleKey::new(self.id, self.renewal_date)
    }
}

/// Identity of one renewal occurrence of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenewalCycleKey {
    pub subscription_id: Uuid,
    pub renewal_date: NaiveDate,
}

impl RenewalCycleKey {
    pub fn new(subscription_id: Uuid, renewal_date: NaiveDate) -> Self {
        Self {
            subscription_id,
            renewal_date,
        }
    }
}

impl std::fmt::Display for RenewalCycleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.subscription_id, self.renewal_date)
    }
}

/// A confirmed renewal alert. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub subscription_id: Uuid,
    pub renewal_date: NaiveDate,
    pub notified_at: DateTime<Utc>,
    pub recipient: String,
    pub outcome: DeliveryStatus,
}

impl LedgerEntry {
    pub fn cycle_key(&self) -> RenewalCycleKey {
        RenewalCycleKey::new(self.subscription_id, self.renewal_date)
    }
}

/// Parse a decimal amount such as `"9.99"` or `"12"` into cents.
///
/// Amounts never pass through binary floating point.
pub fn parse_cost_cents(raw: &str) -> Result<i64, AppError> {
    let invalid = || AppError::Validation(format!("Invalid cost '{}'", raw));
    let trimmed = raw.trim();

    if trimmed.starts_with('-') {
        return Err(AppError::Validation(format!(
            "Cost must be non-negative, got '{}'",
            raw
        )));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    if fraction.len() > 2 {
        return Err(AppError::Validation(format!(
            "Cost '{}' has more than two decimal places",
            raw
        )));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse().map_err(|_| invalid())?,
    };

    whole
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Render a cost in cents for humans: `$12.34` for USD, `12.34 EUR` otherwise.
pub fn format_cost(cost_cents: i64, currency: &str) -> String {
    let sign = if cost_cents < 0 { "-" } else { "" };
    let abs = cost_cents.unsigned_abs();
    let amount = format!("{}{}.{:02}", sign, abs / 100, abs % 100);
    if currency.eq_ignore_ascii_case("USD") {
        format!("${}", amount)
    } else {
        format!("{} {}", amount, currency.to_uppercase())
    }
}
