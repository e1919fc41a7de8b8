// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable wall-clock time
//!
//! Cron occurrences and `last_run`/`next_run` stamps are wall-clock values,
//! while timers are armed on the tokio clock. `FakeClock` ties the two
//! together so tests running with paused tokio time see a consistent world.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A clock that provides the current wall-clock time
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing
///
/// Wall time follows the tokio clock from the moment of construction, so
/// `tokio::time::advance` (or auto-advance under `start_paused`) moves it
/// forward too. `advance` and `set` jump wall time without firing timers.
#[derive(Clone)]
pub struct FakeClock {
    origin: DateTime<Utc>,
    anchor: tokio::time::Instant,
    skew: Arc<Mutex<TimeDelta>>,
}

impl FakeClock {
    /// Fake clock starting at 2026-01-01T00:00:00Z
    pub fn new() -> Self {
        Self::at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }

    /// Fake clock starting at the given wall time
    pub fn at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: tokio::time::Instant::now(),
            skew: Arc::new(Mutex::new(TimeDelta::zero())),
        }
    }

    /// Jump wall time forward without touching the tokio clock
    pub fn advance(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero());
        let mut skew = self.skew.lock().unwrap_or_else(|e| e.into_inner());
        *skew += delta;
    }

    /// Set wall time to a specific instant
    pub fn set(&self, at: DateTime<Utc>) {
        let mut skew = self.skew.lock().unwrap_or_else(|e| e.into_inner());
        *skew = at - (self.origin + self.elapsed());
    }

    fn elapsed(&self) -> TimeDelta {
        TimeDelta::from_std(self.anchor.elapsed()).unwrap_or_else(|_| TimeDelta::zero())
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let skew = *self.skew.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + self.elapsed() + skew
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
