//! Scan cadence: a cron expression evaluated in a fixed UTC offset.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use cron::Schedule;

use subsentry_common::error::AppError;

#[derive(Debug, Clone)]
pub struct Cadence {
    expression: String,
    schedule: Schedule,
    offset: FixedOffset,
}

impl Cadence {
    /// Parse a 5- or 6-field cron expression and a `±HH:MM` offset.
    pub fn parse(expression: &str, utc_offset: &str) -> Result<Self, AppError> {
        let normalized = normalize_cron(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            AppError::Config(format!("Invalid cron expression '{}': {}", expression, e))
        })?;
        let offset = parse_utc_offset(utc_offset)?;

        if schedule.after(&Utc::now().with_timezone(&offset)).next().is_none() {
            return Err(AppError::Config(format!(
                "Cron expression '{}' never fires again",
                expression
            )));
        }

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
            offset,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The first tick strictly after `now`, in the operating offset.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
        self.schedule
            .after(&now.with_timezone(&self.offset))
            .next()
    }

    /// The calendar date at `now` in the operating offset.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`.
fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse `Z`, `UTC`, `+HH:MM`, `-HH:MM` or `+HHMM`.
fn parse_utc_offset(raw: &str) -> Result<FixedOffset, AppError> {
    let invalid = || {
        AppError::Config(format!(
            "Invalid SCHEDULER_UTC_OFFSET '{}': expected e.g. +00:00 or -05:30",
            raw
        ))
    };
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
