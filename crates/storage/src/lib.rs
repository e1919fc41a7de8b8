// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable storage for instance definitions and scheduled tasks
//!
//! Both registries keep their records in memory and mirror them to a JSON
//! array file in the data directory. Instance definitions are written through
//! a coalescing writer; tasks are written synchronously on every mutation.

mod coalesce;
mod error;
mod instances;
mod json_list;
mod tasks;

pub use coalesce::{CoalescedWriter, DEFAULT_PERSIST_WINDOW};
pub use error::StoreError;
pub use instances::{InstanceRegistry, INSTANCES_FILE};
pub use json_list::{load_list, save_list};
pub use tasks::{TaskRegistry, TASKS_FILE};
