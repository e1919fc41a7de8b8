// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! keeper-daemon: the `keeperd` process
//!
//! Loads configuration, takes the single-instance lock, wires the
//! orchestrator and task engine to the pipe-backed session provider, and
//! serves the length-prefixed JSON control protocol on a Unix socket.

pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use config::{Args, DaemonConfig, Timings};
pub use lifecycle::{startup, DaemonError, DaemonState, STARTUP_MARKER_PREFIX};
pub use protocol::{ProtocolError, Request, Response};
pub use server::{Context, ServerError};
