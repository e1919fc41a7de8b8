// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn id() -> InstanceId {
    InstanceId::new("inst-1")
}

#[parameterized(
    not_found = { LifecycleError::NotFound(id()), ErrorKind::NotFound },
    already_running = { LifecycleError::AlreadyRunning(id()), ErrorKind::InvalidState },
    already_starting = { LifecycleError::AlreadyStarting(id()), ErrorKind::InvalidState },
    already_stopping = { LifecycleError::AlreadyStopping(id()), ErrorKind::InvalidState },
    not_running = { LifecycleError::NotRunning(id()), ErrorKind::InvalidState },
    not_stopped = { LifecycleError::NotStopped(id()), ErrorKind::InvalidState },
    missing_session = { LifecycleError::MissingSession(id()), ErrorKind::InvalidState },
    bad_cwd = { LifecycleError::InvalidWorkingDirectory("/nope".into()), ErrorKind::InvalidWorkingDirectory },
    bad_def = { LifecycleError::InvalidDefinition(DefinitionError::EmptyName), ErrorKind::Invalid },
    timeout = {
        LifecycleError::SessionCreationTimeout { id: id(), timeout: Duration::from_secs(5) },
        ErrorKind::SessionCreationTimeout
    },
    session = { LifecycleError::Session(SessionError::NotFound("s".into())), ErrorKind::SessionError },
    storage = { LifecycleError::Storage(StoreError::WriterClosed), ErrorKind::Storage },
)]
fn lifecycle_error_kind(error: LifecycleError, expected: ErrorKind) {
    assert_eq!(error.kind(), expected);
}

#[parameterized(
    not_found = { TaskError::NotFound(TaskId::new("t")), ErrorKind::NotFound },
    instance_not_found = { TaskError::InstanceNotFound(id()), ErrorKind::NotFound },
    not_running = { TaskError::InstanceNotRunning(id()), ErrorKind::InvalidState },
    nested = { TaskError::Lifecycle(LifecycleError::NotRunning(id())), ErrorKind::InvalidState },
    storage = { TaskError::Storage(StoreError::WriterClosed), ErrorKind::Storage },
)]
fn task_error_kind(error: TaskError, expected: ErrorKind) {
    assert_eq!(error.kind(), expected);
}

#[test]
fn invalid_schedule_message_names_the_expression() {
    let err = TaskError::from(keeper_core::CronSchedule::parse("not-a-cron").unwrap_err());
    assert_eq!(err.kind(), ErrorKind::InvalidSchedule);
    assert!(err.to_string().contains("not-a-cron"));
}

#[test]
fn error_kind_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorKind::SessionCreationTimeout).unwrap();
    assert_eq!(json, "\"session_creation_timeout\"");
}
