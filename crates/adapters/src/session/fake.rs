// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake session provider for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{SessionError, SessionProvider, SessionSink, TerminalSize, INTERRUPT_BYTE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Create {
        id: String,
        cwd: PathBuf,
        size: TerminalSize,
    },
    Write {
        id: String,
        data: Vec<u8>,
    },
    Close {
        id: String,
    },
}

/// Fake session state
#[derive(Debug, Clone)]
pub struct FakeSession {
    pub id: String,
    pub cwd: PathBuf,
    pub size: TerminalSize,
    pub pid: u32,
    pub input: Vec<u8>,
    pub open: bool,
}

/// Scripted behaviour of the fake process
#[derive(Debug, Clone)]
struct Behavior {
    /// Report ready right after create
    ready: bool,
    /// Fail `create` itself
    create_error: Option<String>,
    /// Report a session error instead of ready
    ready_error: Option<String>,
    /// Exit when a cooperative stop payload is written
    exit_on_stop: bool,
    /// Report an exit when force-closed
    exit_on_close: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready: true,
            create_error: None,
            ready_error: None,
            exit_on_stop: true,
            exit_on_close: true,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, FakeSession>,
    sinks: HashMap<String, Arc<dyn SessionSink>>,
    calls: Vec<SessionCall>,
    behavior: Behavior,
    next_pid: u32,
}

/// Fake session provider for testing
///
/// By default sessions become ready immediately, exit when one of the stop
/// payloads (`0x03`, `stop\n`, `exit\n`) is written, and report an exit when
/// force-closed.
#[derive(Clone, Default)]
pub struct FakeSessionProvider {
    inner: Arc<Mutex<Inner>>,
}

impl FakeSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Never report ready for new sessions
    pub fn set_never_ready(&self) {
        self.lock().behavior.ready = false;
    }

    /// Make `create` fail outright
    pub fn set_create_error(&self, message: impl Into<String>) {
        self.lock().behavior.create_error = Some(message.into());
    }

    /// Report a session error instead of ready
    pub fn set_ready_error(&self, message: impl Into<String>) {
        self.lock().behavior.ready_error = Some(message.into());
    }

    /// Ignore cooperative stop payloads (a process that hangs on shutdown)
    pub fn set_ignore_stop(&self) {
        self.lock().behavior.exit_on_stop = false;
    }

    /// Stay silent when force-closed
    pub fn set_silent_close(&self) {
        self.lock().behavior.exit_on_close = false;
    }

    /// Restore default behaviour
    pub fn reset_behavior(&self) {
        self.lock().behavior = Behavior::default();
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<SessionCall> {
        self.lock().calls.clone()
    }

    /// Get a session by ID
    pub fn get_session(&self, id: &str) -> Option<FakeSession> {
        self.lock().sessions.get(id).cloned()
    }

    /// IDs of sessions that have not exited or been closed
    pub fn open_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .sessions
            .values()
            .filter(|s| s.open)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every write made to a session, in order
    pub fn writes(&self, id: &str) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SessionCall::Write { id: call_id, data } if call_id == id => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `close` calls for a session
    pub fn close_count(&self, id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, SessionCall::Close { id: call_id } if call_id == id))
            .count()
    }

    /// Emit output from a session's process
    pub async fn emit_output(&self, id: &str, data: &[u8]) {
        let sink = self.lock().sinks.get(id).cloned();
        if let Some(sink) = sink {
            sink.output(id, data).await;
        }
    }

    /// End a session as if its process exited
    pub async fn emit_exit(&self, id: &str, code: Option<i32>) {
        if let Some(sink) = self.finish(id) {
            sink.exit(id, code).await;
        }
    }

    /// End a session with a provider error
    pub async fn emit_error(&self, id: &str, message: &str) {
        if let Some(sink) = self.finish(id) {
            sink.error(id, message).await;
        }
    }

    /// Mark a session closed, returning its sink if it was still open
    fn finish(&self, id: &str) -> Option<Arc<dyn SessionSink>> {
        let mut inner = self.lock();
        let session = inner.sessions.get_mut(id)?;
        if !session.open {
            return None;
        }
        session.open = false;
        inner.sinks.remove(id)
    }
}

fn is_stop_payload(data: &[u8]) -> bool {
    data == [INTERRUPT_BYTE] || data == b"stop\n" || data == b"exit\n"
}

#[async_trait]
impl SessionProvider for FakeSessionProvider {
    async fn create(
        &self,
        id: &str,
        size: TerminalSize,
        cwd: &Path,
        sink: Arc<dyn SessionSink>,
    ) -> Result<(), SessionError> {
        let (behavior, pid) = {
            let mut inner = self.lock();
            inner.calls.push(SessionCall::Create {
                id: id.to_string(),
                cwd: cwd.to_path_buf(),
                size,
            });

            if let Some(message) = inner.behavior.create_error.clone() {
                return Err(SessionError::SpawnFailed(message));
            }
            if inner.sessions.get(id).is_some_and(|s| s.open) {
                return Err(SessionError::AlreadyExists(id.to_string()));
            }

            inner.next_pid += 1;
            let pid = 1000 + inner.next_pid;
            inner.sessions.insert(
                id.to_string(),
                FakeSession {
                    id: id.to_string(),
                    cwd: cwd.to_path_buf(),
                    size,
                    pid,
                    input: Vec::new(),
                    open: true,
                },
            );
            inner.sinks.insert(id.to_string(), Arc::clone(&sink));
            (inner.behavior.clone(), pid)
        };

        if let Some(message) = behavior.ready_error {
            self.emit_error(id, &message).await;
        } else if behavior.ready {
            sink.ready(id, Some(pid)).await;
        }

        Ok(())
    }

    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let exit_on_stop = {
            let mut inner = self.lock();
            inner.calls.push(SessionCall::Write {
                id: id.to_string(),
                data: data.to_vec(),
            });

            let exit_on_stop = inner.behavior.exit_on_stop;
            match inner.sessions.get_mut(id) {
                Some(session) if session.open => session.input.extend_from_slice(data),
                _ => return Err(SessionError::NotFound(id.to_string())),
            }
            exit_on_stop
        };

        if exit_on_stop && is_stop_payload(data) {
            self.emit_exit(id, Some(0)).await;
        }

        Ok(())
    }

    async fn close(&self, id: &str) -> Result<(), SessionError> {
        let exit_on_close = {
            let mut inner = self.lock();
            inner
                .calls
                .push(SessionCall::Close { id: id.to_string() });
            inner.behavior.exit_on_close
        };

        if exit_on_close {
            self.emit_exit(id, None).await;
        } else {
            self.finish(id);
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
