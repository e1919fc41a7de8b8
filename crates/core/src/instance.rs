// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance definitions and the live status state machine
//!
//! An instance is split in two halves with different owners:
//!
//! - [`InstanceDef`] is the durable definition kept by the instance registry
//!   and written to `instances.json`.
//! - [`InstanceStatus`] is the live half owned by the orchestrator. It is
//!   never persisted; every instance boots as `stopped`.
//!
//! `InstanceStatus` transitions keep the session binding in lockstep with the
//! lifecycle state: a session id is bound iff the state is `starting`,
//! `running` or `stopping`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Start command sentinel meaning "no command configured"
pub const NO_COMMAND: &str = "none";

/// Unique identifier for an instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a running instance is asked to shut down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopStrategy {
    /// Send a single interrupt control byte (Ctrl-C)
    #[default]
    InterruptSignal,
    /// Type `stop` followed by a newline
    TypedStopCommand,
    /// Type `exit` followed by a newline
    TypedExitCommand,
}

impl StopStrategy {
    /// Bytes written into the session to request a cooperative stop
    pub fn payload(&self) -> &'static [u8] {
        match self {
            StopStrategy::InterruptSignal => b"\x03",
            StopStrategy::TypedStopCommand => b"stop\n",
            StopStrategy::TypedExitCommand => b"exit\n",
        }
    }
}

impl fmt::Display for StopStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopStrategy::InterruptSignal => write!(f, "interrupt-signal"),
            StopStrategy::TypedStopCommand => write!(f, "typed-stop-command"),
            StopStrategy::TypedExitCommand => write!(f, "typed-exit-command"),
        }
    }
}

impl std::str::FromStr for StopStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interrupt-signal" => Ok(StopStrategy::InterruptSignal),
            "typed-stop-command" => Ok(StopStrategy::TypedStopCommand),
            "typed-exit-command" => Ok(StopStrategy::TypedExitCommand),
            _ => Err(format!("unknown stop strategy: {}", s)),
        }
    }
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Last start attempt or session failed; cleared by a fresh start
    Error,
}

impl InstanceState {
    /// States in which a session is bound
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
        )
    }

    /// States a restart or delete waits for after stopping
    pub fn is_settled(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Error)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Error => write!(f, "error"),
        }
    }
}

/// Validation failures for instance definitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("instance name must not be empty")]
    EmptyName,
    #[error("working directory must be an absolute path: {0}")]
    RelativeWorkingDir(PathBuf),
    #[error("start command must not be empty (use \"none\" for no command)")]
    EmptyCommand,
}

/// Durable instance definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDef {
    pub id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub working_dir: PathBuf,
    pub start_command: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub stop_strategy: StopStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceDef {
    /// Whether a real start command is configured
    pub fn has_start_command(&self) -> bool {
        let cmd = self.start_command.trim();
        !cmd.is_empty() && cmd != NO_COMMAND
    }

    /// The line written into a fresh session, if any
    pub fn start_line(&self) -> Option<String> {
        self.has_start_command()
            .then(|| format!("{}\n", self.start_command.trim_end_matches(&['\r', '\n'][..])))
    }
}

fn validate(name: &str, working_dir: &Path, start_command: &str) -> Result<(), DefinitionError> {
    if name.trim().is_empty() {
        return Err(DefinitionError::EmptyName);
    }
    if !working_dir.is_absolute() {
        return Err(DefinitionError::RelativeWorkingDir(working_dir.to_path_buf()));
    }
    if start_command.trim().is_empty() {
        return Err(DefinitionError::EmptyCommand);
    }
    Ok(())
}

fn no_command() -> String {
    NO_COMMAND.to_string()
}

/// Input for creating an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub working_dir: PathBuf,
    #[serde(default = "no_command")]
    pub start_command: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub stop_strategy: StopStrategy,
}

impl InstanceDraft {
    pub fn new(name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            working_dir: working_dir.into(),
            start_command: no_command(),
            auto_start: false,
            stop_strategy: StopStrategy::default(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.start_command = command.into();
        self
    }

    pub fn with_stop_strategy(mut self, strategy: StopStrategy) -> Self {
        self.stop_strategy = strategy;
        self
    }

    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    /// Validate and turn the draft into a definition
    pub fn into_def(self, id: InstanceId, now: DateTime<Utc>) -> Result<InstanceDef, DefinitionError> {
        validate(&self.name, &self.working_dir, &self.start_command)?;
        Ok(InstanceDef {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            working_dir: self.working_dir,
            start_command: self.start_command,
            auto_start: self.auto_start,
            stop_strategy: self.stop_strategy,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of an instance definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub start_command: Option<String>,
    pub auto_start: Option<bool>,
    pub stop_strategy: Option<StopStrategy>,
}

impl InstancePatch {
    /// Apply the patch, returning the validated new definition
    pub fn apply(&self, def: &InstanceDef, now: DateTime<Utc>) -> Result<InstanceDef, DefinitionError> {
        let mut next = def.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(dir) = &self.working_dir {
            next.working_dir = dir.clone();
        }
        if let Some(command) = &self.start_command {
            next.start_command = command.clone();
        }
        if let Some(auto_start) = self.auto_start {
            next.auto_start = auto_start;
        }
        if let Some(strategy) = self.stop_strategy {
            next.stop_strategy = strategy;
        }
        validate(&next.name, &next.working_dir, &next.start_command)?;
        next.updated_at = now;
        Ok(next)
    }
}

/// Live status of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub session_id: Option<String>,
    pub last_started: Option<DateTime<Utc>>,
    pub last_stopped: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl InstanceStatus {
    /// Check the session/state invariant
    pub fn is_consistent(&self) -> bool {
        self.session_id.is_some() == self.state.is_active()
    }

    /// Whether `session_id` is the session currently bound
    pub fn is_bound_to(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    /// `stopped`/`error` -> `starting`, binding a new session
    pub fn begin_start(&mut self, session_id: impl Into<String>) {
        self.state = InstanceState::Starting;
        self.session_id = Some(session_id.into());
        self.pid = None;
        self.last_error = None;
    }

    /// `starting` -> `running`
    pub fn mark_running(&mut self, pid: Option<u32>, now: DateTime<Utc>) {
        self.state = InstanceState::Running;
        self.pid = pid;
        self.last_started = Some(now);
    }

    /// `running` -> `stopping`
    pub fn begin_stop(&mut self) {
        self.state = InstanceState::Stopping;
    }

    /// Any active state -> `stopped`, releasing the session
    pub fn mark_stopped(&mut self, now: DateTime<Utc>) {
        self.state = InstanceState::Stopped;
        self.session_id = None;
        self.pid = None;
        self.last_stopped = Some(now);
    }

    /// Any state -> `error`, releasing the session
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.state = InstanceState::Error;
        self.session_id = None;
        self.pid = None;
        self.last_error = Some(message.into());
    }
}

/// Definition plus live status, as reported by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    #[serde(flatten)]
    pub def: InstanceDef,
    pub status: InstanceStatus,
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
