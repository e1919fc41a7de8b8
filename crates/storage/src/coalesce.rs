// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write coalescing for frequently requested saves
//!
//! A dedicated task owns the save closure. `schedule` marks the data dirty
//! and opens a window; every request landing inside the window shares one
//! save at its end. `flush` saves immediately and `shutdown` saves whatever
//! is pending before the task exits.

use crate::error::StoreError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Default coalescing window for instance registry writes
pub const DEFAULT_PERSIST_WINDOW: Duration = Duration::from_secs(1);

enum WriterMsg {
    Dirty,
    Flush(oneshot::Sender<Result<(), StoreError>>),
    Shutdown(oneshot::Sender<Result<(), StoreError>>),
}

/// Handle to a coalescing writer task
#[derive(Clone)]
pub struct CoalescedWriter {
    tx: mpsc::UnboundedSender<WriterMsg>,
}

impl CoalescedWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn<F>(name: &'static str, window: Duration, save: F) -> Self
    where
        F: FnMut() -> Result<(), StoreError> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(name, window, save, rx));
        Self { tx }
    }

    /// Request a save at the end of the current window
    pub fn schedule(&self) {
        if self.tx.send(WriterMsg::Dirty).is_err() {
            tracing::warn!("persist requested after writer shut down");
        }
    }

    /// Save now, including anything pending
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriterMsg::Flush(reply))
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Save anything pending and stop the writer task
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriterMsg::Shutdown(reply))
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)?
    }
}

async fn run<F>(
    name: &'static str,
    window: Duration,
    mut save: F,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
) where
    F: FnMut() -> Result<(), StoreError> + Send + 'static,
{
    // Deadline of the open window, if anything is dirty
    let mut deadline: Option<Instant> = None;

    loop {
        let msg = match deadline {
            Some(at) => tokio::select! {
                msg = rx.recv() => msg,
                _ = tokio::time::sleep_until(at) => {
                    deadline = None;
                    if let Err(e) = save() {
                        tracing::error!(writer = name, error = %e, "coalesced save failed");
                    } else {
                        tracing::debug!(writer = name, "coalesced save");
                    }
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match msg {
            Some(WriterMsg::Dirty) => {
                if deadline.is_none() {
                    deadline = Some(Instant::now() + window);
                }
            }
            Some(WriterMsg::Flush(reply)) => {
                deadline = None;
                let _ = reply.send(save());
            }
            Some(WriterMsg::Shutdown(reply)) => {
                let result = if deadline.is_some() { save() } else { Ok(()) };
                let _ = reply.send(result);
                break;
            }
            None => {
                // Every handle dropped
                if deadline.is_some() {
                    if let Err(e) = save() {
                        tracing::error!(writer = name, error = %e, "final save failed");
                    }
                }
                break;
            }
        }
    }

    tracing::debug!(writer = name, "writer stopped");
}

#[cfg(test)]
#[path = "coalesce_tests.rs"]
mod tests;
