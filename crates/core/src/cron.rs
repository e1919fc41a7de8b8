// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron schedule evaluation
//!
//! Accepts the six-field form used by the dashboard (`sec min hour dom mon
//! dow`) and the classic five-field form, which runs at second zero.
//! Occurrences are computed in a named time zone and reported in UTC.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use thiserror::Error;

/// Zone used when the daemon configuration does not name one
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Shanghai;

/// Cron expression that failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression {expression:?}: {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {}", trimmed),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(ScheduleError {
                    expression: expression.to_string(),
                    reason: format!("expected 5 or 6 fields, found {}", n),
                })
            }
        };

        let schedule = ::cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as written (trimmed)
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`, evaluated in `tz`
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// Next occurrence of `expression` after `now`
///
/// `Ok(None)` means the expression is valid but never fires again (for
/// example a fixed year in the past).
pub fn next_run_time(
    expression: &str,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    Ok(CronSchedule::parse(expression)?.next_after(now, tz))
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
