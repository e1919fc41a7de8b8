// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: command line, optional `keeperd.toml`, environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use clap::Parser;
use keeper_adapters::TerminalSize;
use keeper_core::DEFAULT_TIMEZONE;
use keeper_engine::{LifecycleConfig, TaskEngineConfig};
use keeper_storage::DEFAULT_PERSIST_WINDOW;
use serde::Deserialize;

use crate::lifecycle::DaemonError;

/// Overrides the state directory
pub const STATE_DIR_ENV: &str = "KEEPER_STATE_DIR";
/// Overrides the control socket path
pub const SOCKET_ENV: &str = "KEEPER_SOCKET";
/// Config file looked up in the state directory when `--config` is absent
pub const CONFIG_FILE: &str = "keeperd.toml";

/// Command line
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "keeperd", version, about = "Keeps game and app servers running on schedule")]
pub struct Args {
    /// Path to a keeperd.toml
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding instances.json and tasks.json
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Lifecycle and task timings, shared by every instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timings {
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    #[serde(with = "humantime_serde")]
    pub restart_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub restart_settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub command_enter_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        let lifecycle = LifecycleConfig::default();
        Self {
            ready_timeout: lifecycle.ready_timeout,
            grace_period: lifecycle.grace_period,
            restart_poll_interval: lifecycle.restart_poll_interval,
            restart_settle_delay: lifecycle.restart_settle_delay,
            command_enter_delay: TaskEngineConfig::default().command_enter_delay,
        }
    }
}

/// Contents of `keeperd.toml`; every key is optional
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    socket_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    timezone: Tz,
    shell: Option<String>,
    #[serde(with = "humantime_serde")]
    persist_window: Duration,
    timings: Timings,
    terminal: TerminalSize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            socket_path: None,
            log_path: None,
            timezone: DEFAULT_TIMEZONE,
            shell: None,
            persist_window: DEFAULT_PERSIST_WINDOW,
            timings: Timings::default(),
            terminal: TerminalSize::default(),
        }
    }
}

/// Resolved daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Root for the lock, log and socket unless overridden
    pub state_dir: PathBuf,
    /// Where instances.json and tasks.json live
    pub data_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    /// Zone cron expressions are evaluated in
    pub timezone: Tz,
    /// Shell used by the pipe session provider (platform default when unset)
    pub shell: Option<String>,
    /// Coalescing window for instance definition writes
    pub persist_window: Duration,
    pub timings: Timings,
    pub terminal: TerminalSize,
}

impl DaemonConfig {
    /// Resolve configuration from the command line, the config file and `env`
    ///
    /// Precedence, highest first: command line, environment, config file,
    /// defaults under the state directory.
    pub fn load(args: &Args, env: impl Fn(&str) -> Option<String>) -> Result<Self, DaemonError> {
        let state_dir = state_dir(&env)?;

        let file = match &args.config {
            Some(path) => read_file(path)?,
            None => {
                let default_path = state_dir.join(CONFIG_FILE);
                if default_path.is_file() {
                    read_file(&default_path)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let data_dir = args
            .data_dir
            .clone()
            .or(file.data_dir)
            .unwrap_or_else(|| state_dir.clone());
        let socket_path = env(SOCKET_ENV)
            .map(PathBuf::from)
            .or(file.socket_path)
            .unwrap_or_else(|| state_dir.join("keeperd.sock"));
        let log_path = file
            .log_path
            .unwrap_or_else(|| state_dir.join("keeperd.log"));

        Ok(Self {
            lock_path: state_dir.join("keeperd.pid"),
            state_dir,
            data_dir,
            socket_path,
            log_path,
            timezone: file.timezone,
            shell: file.shell,
            persist_window: file.persist_window,
            timings: file.timings,
            terminal: file.terminal,
        })
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            ready_timeout: self.timings.ready_timeout,
            grace_period: self.timings.grace_period,
            restart_poll_interval: self.timings.restart_poll_interval,
            restart_settle_delay: self.timings.restart_settle_delay,
            terminal_size: self.terminal,
        }
    }

    pub fn task_engine(&self) -> TaskEngineConfig {
        TaskEngineConfig {
            timezone: self.timezone,
            command_enter_delay: self.timings.command_enter_delay,
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, DaemonError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| DaemonError::ConfigRead(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| DaemonError::ConfigParse(path.to_path_buf(), e))
}

/// State directory: `$KEEPER_STATE_DIR`, `$XDG_STATE_HOME/keeper`, or `~/.local/state/keeper`
fn state_dir(env: &impl Fn(&str) -> Option<String>) -> Result<PathBuf, DaemonError> {
    if let Some(dir) = env(STATE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(xdg) = env("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("keeper"));
    }
    let home = env("HOME").ok_or(DaemonError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/keeper"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
