// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! keeper-core: data model shared by the Keeper daemon crates
//!
//! This crate provides:
//! - Instance definitions and the live status state machine
//! - Scheduled task definitions
//! - Cron schedule evaluation in a named time zone
//! - Clock and id abstractions for deterministic tests
//! - Events and the in-process event bus

pub mod bus;
pub mod clock;
pub mod cron;
pub mod event;
pub mod id;
pub mod instance;
pub mod task;

pub use bus::{EventBus, EventReceiver};
pub use clock::{Clock, FakeClock, SystemClock};
pub use cron::{next_run_time, CronSchedule, ScheduleError, DEFAULT_TIMEZONE};
pub use event::Event;
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use instance::{
    DefinitionError, InstanceDef, InstanceDraft, InstanceId, InstancePatch, InstanceSnapshot,
    InstanceState, InstanceStatus, StopStrategy, NO_COMMAND,
};
pub use task::{PowerAction, ScheduledTask, TaskAction, TaskDraft, TaskId, TaskPatch};
