//! Renewal scan: which subscriptions are due for an alert on a given day.
//!
//! Matching only selects candidates. Whether a candidate is actually sent is
//! decided by the alert ledger, so re-running a scan for the same day is safe.

use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use subsentry_common::error::AppError;
use subsentry_common::types::Subscription;

use crate::store::SubscriptionStore;

/// How renewal dates are matched against the scan day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Only renewals on exactly `today + lead_days`.
    Exact,
    /// Any renewal in `[today, today + lead_days]`, so a missed scan day still alerts.
    CatchUp,
}

impl FromStr for MatchPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchPolicy::Exact),
            "catch_up" | "catchup" | "catch-up" => Ok(MatchPolicy::CatchUp),
            other => Err(AppError::Config(format!(
                "Invalid RENEWAL_MATCH_POLICY '{}': expected exact or catch_up",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchPolicy::Exact => write!(f, "exact"),
            MatchPolicy::CatchUp => write!(f, "catch_up"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenewalScanner {
    lead_days: u32,
    policy: MatchPolicy,
}

impl RenewalScanner {
    pub fn new(lead_days: u32, policy: MatchPolicy) -> Self {
        Self { lead_days, policy }
    }

    /// `today + lead_days`.
    pub fn target_date(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_days(Days::new(u64::from(self.lead_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Inclusive renewal-date window scanned on `today`.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let target = self.target_date(today);
        match self.policy {
            MatchPolicy::Exact => (target, target),
            MatchPolicy::CatchUp => (today, target),
        }
    }

    /// Whether `sub` is an alert candidate on `today`.
    pub fn is_due(&self, sub: &Subscription, today: NaiveDate) -> bool {
        let (start, end) = self.window(today);
        sub.active && sub.renewal_date >= start && sub.renewal_date <= end
    }

    /// Query the store and return the due set, ordered by `(renewal_date, id)`.
    ///
    /// The store's answer is re-filtered with [`Self::is_due`], so a store that
    /// over-returns cannot widen the due set.
    pub async fn find_due(
        &self,
        store: &dyn SubscriptionStore,
        today: NaiveDate,
    ) -> Result<Vec<Subscription>, AppError> {
        let (start, end) = self.window(today);
        let mut due: Vec<Subscription> = store
            .find_active_renewing(start, end)
            .await?
            .into_iter()
            .filter(|sub| self.is_due(sub, today))
            .collect();
        due.sort_by_key(|s| (s.renewal_date, s.id));
        due.dedup_by_key(|s| s.id);
        Ok(due)
    }
}

/// Active subscriptions renewing on exactly `now + lead_days`.
pub async fn find_due_subscriptions(
    store: &dyn SubscriptionStore,
    now: NaiveDate,
    lead_days: u32,
) -> Result<Vec<Subscription>, AppError> {
    RenewalScanner::new(lead_days, MatchPolicy::Exact)
        .find_due(store, now)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::store::MemorySubscriptionStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sub(renewal_date: NaiveDate, active: bool) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id: "user_1".to_string(),
            user_email: "alice@example.com".to_string(),
            name: "iCloud".to_string(),
            cost_cents: 299,
            currency: "USD".to_string(),
            category: "Storage".to_string(),
            renewal_date,
            active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Returns everything it holds, ignoring the requested window.
    struct SloppyStore(Vec<Subscription>);

    #[async_trait::async_trait]
    impl SubscriptionStore for SloppyStore {
        async fn find_active_renewing(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<Subscription>, AppError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_match_policy_from_str() {
        assert_eq!("exact".parse::<MatchPolicy>().unwrap(), MatchPolicy::Exact);
        assert_eq!("Catch_Up".parse::<MatchPolicy>().unwrap(), MatchPolicy::CatchUp);
        assert!("sometimes".parse::<MatchPolicy>().is_err());
    }

    #[test]
    fn test_windows() {
        let today = date(2024, 1, 1);
        let exact = RenewalScanner::new(3, MatchPolicy::Exact);
        let catch_up = RenewalScanner::new(3, MatchPolicy::CatchUp);

        assert_eq!(exact.window(today), (date(2024, 1, 4), date(2024, 1, 4)));
        assert_eq!(catch_up.window(today), (date(2024, 1, 1), date(2024, 1, 4)));
    }

    #[test]
    fn test_target_crosses_month_and_year() {
        let scanner = RenewalScanner::new(3, MatchPolicy::Exact);
        assert_eq!(scanner.target_date(date(2024, 2, 27)), date(2024, 3, 1));
        assert_eq!(scanner.target_date(date(2023, 12, 30)), date(2024, 1, 2));
    }

    #[test]
    fn test_zero_lead_days_targets_today() {
        let scanner = RenewalScanner::new(0, MatchPolicy::Exact);
        assert_eq!(scanner.target_date(date(2024, 1, 1)), date(2024, 1, 1));
    }

    #[tokio::test]
    async fn test_correct_targeting() {
        let due_sub = sub(date(2024, 1, 4), true);
        let too_late = sub(date(2024, 1, 5), true);
        let paused = sub(date(2024, 1, 4), false);
        let store = MemorySubscriptionStore::with_subscriptions(vec![
            due_sub.clone(),
            too_late,
            paused,
        ]);

        let due = find_due_subscriptions(&store, date(2024, 1, 1), 3)
            .await
            .unwrap();
        assert_eq!(due, vec![due_sub]);
    }

    #[tokio::test]
    async fn test_scan_is_repeatable() {
        let store = MemorySubscriptionStore::with_subscriptions(vec![
            sub(date(2024, 1, 4), true),
            sub(date(2024, 1, 4), true),
        ]);

        let first = find_due_subscriptions(&store, date(2024, 1, 1), 3).await.unwrap();
        let second = find_due_subscriptions(&store, date(2024, 1, 1), 3).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_catch_up_includes_missed_days() {
        let missed = sub(date(2024, 1, 2), true);
        let past = sub(date(2023, 12, 31), true);
        let store = MemorySubscriptionStore::with_subscriptions(vec![missed.clone(), past]);

        let scanner = RenewalScanner::new(3, MatchPolicy::CatchUp);
        let due = scanner.find_due(&store, date(2024, 1, 1)).await.unwrap();
        assert_eq!(due, vec![missed]);
    }

    #[tokio::test]
    async fn test_store_results_are_refiltered() {
        let store = SloppyStore(vec![
            sub(date(2024, 1, 4), true),
            sub(date(2024, 6, 1), true),
            sub(date(2024, 1, 4), false),
        ]);

        let due = find_due_subscriptions(&store, date(2024, 1, 1), 3)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].renewal_date, date(2024, 1, 4));
    }
}
