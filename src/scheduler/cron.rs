use crate::window::{self, WindowError};
use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// A parsed cron expression driving detection runs.
#[derive(Debug, Clone)]
pub struct DetectionSchedule {
    expr: String,
    schedule: CronSchedule,
}

impl DetectionSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let schedule = CronSchedule::from_str(expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Ticks in `(from, from + hours]`, for a dry-run preview.
    pub fn preview(&self, from: DateTime<Utc>, hours: u32) -> Result<Vec<DateTime<Utc>>, WindowError> {
        let end = window::hours_after(from, hours)?;
        Ok(self.schedule.after(&from).take_while(|t| *t <= end).collect())
    }
}
