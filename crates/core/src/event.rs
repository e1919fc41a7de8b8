// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events raised by the orchestrator and the task engine

use crate::instance::{InstanceId, InstanceState};
use crate::task::TaskId;
use serde::{Deserialize, Serialize};

/// Observable events for the dashboard and the daemon log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    InstanceStatusChanged {
        instance_id: InstanceId,
        state: InstanceState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    InstanceOutput {
        instance_id: InstanceId,
        data: Vec<u8>,
    },
    /// Something the operator should look at, e.g. no start command
    InstanceWarning {
        instance_id: InstanceId,
        message: String,
    },
    InstanceDeleted {
        instance_id: InstanceId,
    },
    TaskExecuted {
        task_id: TaskId,
        instance_id: InstanceId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Event {
    /// Stable event name, used for log fields
    pub fn name(&self) -> &'static str {
        match self {
            Event::InstanceStatusChanged { .. } => "instance:status",
            Event::InstanceOutput { .. } => "instance:output",
            Event::InstanceWarning { .. } => "instance:warning",
            Event::InstanceDeleted { .. } => "instance:deleted",
            Event::TaskExecuted { .. } => "task:executed",
        }
    }

    /// The instance this event concerns
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            Event::InstanceStatusChanged { instance_id, .. }
            | Event::InstanceOutput { instance_id, .. }
            | Event::InstanceWarning { instance_id, .. }
            | Event::InstanceDeleted { instance_id }
            | Event::TaskExecuted { instance_id, .. } => instance_id,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
