//! Cron schedule validation and next-occurrence computation
//!
//! Schedules are standard 5-field cron expressions. The `cron` crate expects
//! a seconds field, so 5-field expressions are normalized by prepending a
//! zero-seconds field before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },
    #[error("cron expression '{0}' has no upcoming occurrence")]
    NoUpcomingOccurrence(String),
}

/// Parse a cron expression, accepting both 5-field and seconds-bearing forms.
pub fn parse(expr: &str) -> Result<cron::Schedule, ScheduleError> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Whether the expression is a valid cron schedule.
pub fn is_valid(expr: &str) -> bool {
    parse(expr).is_ok()
}

/// The first occurrence of the schedule strictly after the given instant.
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    parse(expr)?
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::NoUpcomingOccurrence(expr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_expression_is_valid() {
        assert!(is_valid("0 * * * *"));
        assert!(is_valid("*/5 * * * *"));
        assert!(is_valid("30 4 * * 1"));
    }

    #[test]
    fn test_seconds_bearing_expression_is_valid() {
        assert!(is_valid("0 0 * * * *"));
    }

    #[test]
    fn test_invalid_expressions_are_rejected() {
        assert!(!is_valid(""));
        assert!(!is_valid("not a cron"));
        assert!(!is_valid("99 * * * *"));
    }

    #[test]
    fn test_next_occurrence_hourly() {
        let after = Utc.with_ymd_and_hms(2023, 5, 17, 10, 23, 45).unwrap();
        let next = next_occurrence("0 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2023, 5, 17, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_is_strictly_after() {
        let exactly_on = Utc.with_ymd_and_hms(2023, 5, 17, 11, 0, 0).unwrap();
        let next = next_occurrence("0 * * * *", exactly_on).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2023, 5, 17, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_rejects_invalid() {
        assert!(next_occurrence("bogus", Utc::now()).is_err());
    }
}
