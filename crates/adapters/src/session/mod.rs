// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session provider and sink traits
//!
//! A provider owns the process behind a session. The caller names the
//! session, and everything the process does afterwards (becoming ready,
//! printing output, exiting, failing) flows back through the
//! [`SessionSink`] handed to [`SessionProvider::create`].

mod pipe;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use pipe::PipeSessionProvider;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSession, FakeSessionProvider, SessionCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Ctrl-C as typed into a terminal
pub const INTERRUPT_BYTE: u8 = 0x03;

/// Errors from session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already exists: {0}")]
    AlreadyExists(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Terminal dimensions requested for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 30, cols: 120 }
    }
}

/// Receives everything a session reports after creation
#[async_trait]
pub trait SessionSink: Send + Sync + 'static {
    /// The process is up and accepting input
    async fn ready(&self, session_id: &str, pid: Option<u32>);
    /// Raw bytes written by the process
    async fn output(&self, session_id: &str, data: &[u8]);
    /// The process ended; the session is gone
    async fn exit(&self, session_id: &str, code: Option<i32>);
    /// The provider lost the session for a reason other than a normal exit
    async fn error(&self, session_id: &str, message: &str);
}

/// Creates, feeds and destroys process sessions
#[async_trait]
pub trait SessionProvider: Clone + Send + Sync + 'static {
    /// Start a session in `cwd`. Readiness arrives through `sink.ready`.
    async fn create(
        &self,
        id: &str,
        size: TerminalSize,
        cwd: &Path,
        sink: Arc<dyn SessionSink>,
    ) -> Result<(), SessionError>;

    /// Forward raw input bytes to the session
    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError>;

    /// Force-terminate the session. Closing an unknown session is not an error.
    async fn close(&self, id: &str) -> Result<(), SessionError>;
}
