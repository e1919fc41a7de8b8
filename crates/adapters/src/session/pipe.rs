// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipe-backed session provider
//!
//! Runs the platform shell in the instance's working directory with piped
//! stdio. Input lines are typed into the shell, so the start command and any
//! typed stop command reach the server through the shell's stdin. There is no
//! line discipline, so the interrupt byte is translated into SIGINT for the
//! session's process group on unix.

use super::{SessionError, SessionProvider, SessionSink, TerminalSize, INTERRUPT_BYTE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[cfg(unix)]
const SHELL: &str = "sh";
#[cfg(windows)]
const SHELL: &str = "cmd";

struct PipeSession {
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

/// Session provider backed by a shell with piped stdio
#[derive(Clone)]
pub struct PipeSessionProvider {
    shell: Arc<str>,
    sessions: Arc<Mutex<HashMap<String, PipeSession>>>,
}

impl PipeSessionProvider {
    pub fn new() -> Self {
        Self::with_shell(SHELL)
    }

    /// Use a different shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: Arc::from(shell.into()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PipeSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PipeSessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn pump<R>(
    session_id: String,
    mut reader: R,
    sink: Arc<dyn SessionSink>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => sink.output(&session_id, &buf[..n]).await,
                Err(e) => {
                    tracing::debug!(session_id, error = %e, "session output closed");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return false;
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid, error = %e, "failed to signal process group");
            false
        }
    }
}

async fn force_kill(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if signal_group(pid, nix::sys::signal::Signal::SIGKILL) {
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "kill failed (process may be gone)");
    }
}

#[async_trait]
impl SessionProvider for PipeSessionProvider {
    async fn create(
        &self,
        id: &str,
        size: TerminalSize,
        cwd: &Path,
        sink: Arc<dyn SessionSink>,
    ) -> Result<(), SessionError> {
        if self.lock().contains_key(id) {
            return Err(SessionError::AlreadyExists(id.to_string()));
        }

        let mut cmd = Command::new(self.shell.as_ref());
        cmd.current_dir(cwd)
            .env("COLUMNS", size.cols.to_string())
            .env("LINES", size.rows.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::SpawnFailed("stdin not captured".to_string()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (kill_tx, kill_rx) = oneshot::channel();
        self.lock().insert(
            id.to_string(),
            PipeSession {
                stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
                pid,
                kill: Some(kill_tx),
            },
        );

        sink.ready(id, pid).await;

        let mut pumps = Vec::new();
        if let Some(stdout) = stdout {
            pumps.push(pump(id.to_string(), stdout, Arc::clone(&sink)));
        }
        if let Some(stderr) = stderr {
            pumps.push(pump(id.to_string(), stderr, Arc::clone(&sink)));
        }

        let sessions = Arc::clone(&self.sessions);
        let session_id = id.to_string();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    force_kill(&mut child, pid).await;
                    child.wait().await
                }
            };

            // Drain output before reporting the exit
            for handle in pumps {
                let _ = handle.await;
            }
            sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&session_id);

            match status {
                Ok(status) => sink.exit(&session_id, status.code()).await,
                Err(e) => sink.error(&session_id, &e.to_string()).await,
            }
        });

        Ok(())
    }

    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let (stdin, pid) = {
            let sessions = self.lock();
            let session = sessions
                .get(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            (Arc::clone(&session.stdin), session.pid)
        };

        #[cfg(unix)]
        {
            if data == [INTERRUPT_BYTE] && signal_group(pid, nix::sys::signal::Signal::SIGINT) {
                return Ok(());
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        let mut stdin = stdin.lock().await;
        stdin
            .write_all(data)
            .await
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| SessionError::WriteFailed(e.to_string()))
    }

    async fn close(&self, id: &str) -> Result<(), SessionError> {
        let kill = self.lock().get_mut(id).and_then(|s| s.kill.take());
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
#[path = "pipe_tests.rs"]
mod tests;
