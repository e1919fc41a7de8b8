// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced provider wrapper for consistent observability

use crate::session::{SessionError, SessionProvider, SessionSink, TerminalSize};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

/// Wrapper that adds tracing to any SessionProvider
#[derive(Clone)]
pub struct TracedSessionProvider<P> {
    inner: P,
}

impl<P> TracedSessionProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SessionProvider> SessionProvider for TracedSessionProvider<P> {
    async fn create(
        &self,
        id: &str,
        size: TerminalSize,
        cwd: &Path,
        sink: Arc<dyn SessionSink>,
    ) -> Result<(), SessionError> {
        let span = tracing::info_span!("session.create", id, cwd = %cwd.display());
        async move {
            tracing::info!(rows = size.rows, cols = size.cols, "starting");

            // Precondition: cwd must exist
            if !cwd.is_dir() {
                tracing::error!("working directory does not exist");
                return Err(SessionError::SpawnFailed(format!(
                    "working directory does not exist: {}",
                    cwd.display()
                )));
            }

            let start = std::time::Instant::now();
            let result = self.inner.create(id, size, cwd, sink).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(()) => tracing::info!(elapsed_ms, "session created"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "create failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let span = tracing::debug_span!("session.write", id);
        async move {
            tracing::debug!(len = data.len(), "writing");
            let result = self.inner.write(id, data).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "write failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn close(&self, id: &str) -> Result<(), SessionError> {
        let span = tracing::info_span!("session.close", id);
        async move {
            let result = self.inner.close(id).await;
            // Closing a session that already ended is routine
            match &result {
                Ok(()) => tracing::info!("closed"),
                Err(e) => tracing::warn!(error = %e, "close failed (may be expected)"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
