//! Bounded lookback and lookahead spans for caller-supplied hour and day counts.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Longest span accepted in hours (one leap year).
pub const MAX_HOURS: u32 = 8784;

/// Longest span accepted in days.
pub const MAX_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("{unit} must be within 1..={max}, got {value}")]
    OutOfRange {
        unit: &'static str,
        value: u64,
        max: u32,
    },

    #[error("time window arithmetic overflowed")]
    Overflow,
}

fn bounded(value: u64, max: u32, unit: &'static str) -> Result<i64, WindowError> {
    if value == 0 || value > u64::from(max) {
        return Err(WindowError::OutOfRange { unit, value, max });
    }
    Ok(value as i64)
}

/// `end - hours`, for `hours` in `1..=MAX_HOURS`.
pub fn hours_before(end: DateTime<Utc>, hours: u32) -> Result<DateTime<Utc>, WindowError> {
    let h = bounded(u64::from(hours), MAX_HOURS, "hours")?;
    end.checked_sub_signed(Duration::hours(h))
        .ok_or(WindowError::Overflow)
}

/// `end - days`, for `days` in `1..=MAX_DAYS`.
pub fn days_before(end: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, WindowError> {
    let d = bounded(u64::from(days), MAX_DAYS, "days")?;
    end.checked_sub_signed(Duration::days(d))
        .ok_or(WindowError::Overflow)
}

/// `start + hours`, for `hours` in `1..=MAX_HOURS`.
pub fn hours_after(start: DateTime<Utc>, hours: u32) -> Result<DateTime<Utc>, WindowError> {
    let h = bounded(u64::from(hours), MAX_HOURS, "hours")?;
    start
        .checked_add_signed(Duration::hours(h))
        .ok_or(WindowError::Overflow)
}
