// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the orchestrator and task engine

use keeper_adapters::SessionError;
use keeper_core::{DefinitionError, InstanceId, ScheduleError, TaskId};
use keeper_storage::StoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse error category reported over the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InvalidWorkingDirectory,
    InvalidSchedule,
    SessionCreationTimeout,
    SessionError,
    Storage,
    Invalid,
}

/// Errors from instance lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("instance not found: {0}")]
    NotFound(InstanceId),
    #[error("instance {0} is already running")]
    AlreadyRunning(InstanceId),
    #[error("instance {0} is already starting")]
    AlreadyStarting(InstanceId),
    #[error("instance {0} is stopping")]
    AlreadyStopping(InstanceId),
    #[error("instance {0} is not running")]
    NotRunning(InstanceId),
    #[error("instance {0} must be stopped first")]
    NotStopped(InstanceId),
    #[error("instance {0} has no active session")]
    MissingSession(InstanceId),
    #[error("working directory does not exist: {}", .0.display())]
    InvalidWorkingDirectory(PathBuf),
    #[error("invalid instance definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),
    #[error("session for {id} was not ready within {timeout:?}")]
    SessionCreationTimeout { id: InstanceId, timeout: Duration },
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound(_) => ErrorKind::NotFound,
            LifecycleError::AlreadyRunning(_)
            | LifecycleError::AlreadyStarting(_)
            | LifecycleError::AlreadyStopping(_)
            | LifecycleError::NotRunning(_)
            | LifecycleError::NotStopped(_)
            | LifecycleError::MissingSession(_) => ErrorKind::InvalidState,
            LifecycleError::InvalidWorkingDirectory(_) => ErrorKind::InvalidWorkingDirectory,
            LifecycleError::InvalidDefinition(_) => ErrorKind::Invalid,
            LifecycleError::SessionCreationTimeout { .. } => ErrorKind::SessionCreationTimeout,
            LifecycleError::Session(_) => ErrorKind::SessionError,
            LifecycleError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Errors from scheduled task operations
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),
    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("instance {0} is not running")]
    InstanceNotRunning(InstanceId),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::NotFound(_) | TaskError::InstanceNotFound(_) => ErrorKind::NotFound,
            TaskError::InvalidSchedule(_) => ErrorKind::InvalidSchedule,
            TaskError::Lifecycle(e) => e.kind(),
            TaskError::Storage(_) => ErrorKind::Storage,
            TaskError::InstanceNotRunning(_) => ErrorKind::InvalidState,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
