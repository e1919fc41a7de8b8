// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timing configuration shared by every instance and task

use chrono_tz::Tz;
use keeper_adapters::TerminalSize;
use keeper_core::DEFAULT_TIMEZONE;
use std::time::Duration;

/// Orchestrator timings
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long `start` waits for the session to report ready
    pub ready_timeout: Duration,
    /// How long a cooperative stop may take before the session is force-closed
    pub grace_period: Duration,
    /// Status poll interval while a restart waits for the stop to land
    pub restart_poll_interval: Duration,
    /// Pause between the stop settling and the new start
    pub restart_settle_delay: Duration,
    /// Terminal size requested for new sessions
    pub terminal_size: TerminalSize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(10),
            restart_poll_interval: Duration::from_millis(500),
            restart_settle_delay: Duration::from_secs(2),
            terminal_size: TerminalSize::default(),
        }
    }
}

/// Task engine settings
#[derive(Debug, Clone)]
pub struct TaskEngineConfig {
    /// Zone cron expressions are evaluated in
    pub timezone: Tz,
    /// Pause between a command line and the extra Enter that follows it
    pub command_enter_delay: Duration,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            command_enter_delay: Duration::from_millis(100),
        }
    }
}
