// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled task definitions
//!
//! A scheduled task binds a cron schedule to one instance and either a power
//! action or a literal command typed into the instance's session.

use crate::instance::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a scheduled task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Power action applied to an instance as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Start => write!(f, "start"),
            PowerAction::Stop => write!(f, "stop"),
            PowerAction::Restart => write!(f, "restart"),
        }
    }
}

/// What a task does when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskAction {
    Power { action: PowerAction },
    Command { command: String },
}

impl TaskAction {
    pub fn power(action: PowerAction) -> Self {
        TaskAction::Power { action }
    }

    pub fn command(command: impl Into<String>) -> Self {
        TaskAction::Command {
            command: command.into(),
        }
    }

    /// `power` or `command`
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::Power { .. } => "power",
            TaskAction::Command { .. } => "command",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskAction::Power { action } => write!(f, "power:{}", action),
            TaskAction::Command { command } => write!(f, "command:{:?}", command),
        }
    }
}

/// A durable cron-triggered action bound to one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub instance_id: InstanceId,
    /// Instance name at the time the task was last saved, for display
    #[serde(default)]
    pub instance_name: String,
    #[serde(flatten)]
    pub action: TaskAction,
    pub schedule: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn enabled_by_default() -> bool {
    true
}

/// Input for creating a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    pub instance_id: InstanceId,
    #[serde(flatten)]
    pub action: TaskAction,
    pub schedule: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl TaskDraft {
    pub fn new(
        name: impl Into<String>,
        instance_id: InstanceId,
        action: TaskAction,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id,
            action,
            schedule: schedule.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update of a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub instance_id: Option<InstanceId>,
    pub action: Option<TaskAction>,
    pub schedule: Option<String>,
    pub enabled: Option<bool>,
}

impl TaskPatch {
    /// Whether the patch changes the cron expression
    pub fn changes_schedule(&self, task: &ScheduledTask) -> bool {
        self.schedule
            .as_deref()
            .is_some_and(|schedule| schedule.trim() != task.schedule)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
