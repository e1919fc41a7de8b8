// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Instance lifecycle orchestrator and scheduled task engine

mod config;
mod error;
mod orchestrator;
mod scheduler;
mod sink;

pub use config::{LifecycleConfig, TaskEngineConfig};
pub use error::{ErrorKind, LifecycleError, TaskError};
pub use orchestrator::Orchestrator;
pub use scheduler::TaskEngine;
