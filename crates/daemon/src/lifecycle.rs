// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup and shutdown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use fs2::FileExt;
use keeper_adapters::{PipeSessionProvider, TracedSessionProvider};
use keeper_core::{Event, EventBus, EventReceiver, SystemClock, UuidIdGen};
use keeper_engine::{Orchestrator, TaskEngine};
use keeper_storage::{InstanceRegistry, StoreError, TaskRegistry};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::server::Context;

/// Startup marker prefix written to the log before anything else.
/// Full format: "--- keeperd: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- keeperd: starting (pid: ";

/// Session provider the daemon runs instances in
pub type DaemonProvider = TracedSessionProvider<PipeSessionProvider>;
pub type DaemonContext = Context<DaemonProvider, SystemClock, UuidIdGen>;

/// Daemon state during operation
pub struct DaemonState {
    pub config: DaemonConfig,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// Unix socket listener
    pub listener: UnixListener,
    /// Shared with every connection handler
    pub context: DaemonContext,
    /// Fires when a client sends `shutdown`
    pub shutdown_requests: mpsc::Receiver<()>,
}

impl DaemonState {
    /// Stop instances, cancel timers, flush state and remove runtime files
    pub async fn shutdown(&mut self) -> Result<(), DaemonError> {
        info!("Shutting down daemon...");

        self.context.engine.shutdown().await;
        if let Err(e) = self.context.orchestrator.shutdown().await {
            warn!("Failed to stop instances cleanly: {}", e);
        }
        self.context.orchestrator.registry().shutdown().await?;

        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            }
        }
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Could not determine state directory (set KEEPER_STATE_DIR or HOME)")]
    NoStateDir,

    #[error("Failed to read config {0}: {1}")]
    ConfigRead(PathBuf, #[source] std::io::Error),

    #[error("Invalid config {0}: {1}")]
    ConfigParse(PathBuf, #[source] toml::de::Error),

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &DaemonConfig) -> Result<DaemonState, DaemonError> {
    match startup_inner(config).await {
        Ok(state) => Ok(state),
        // The lock belongs to the daemon that is already running
        Err(e @ DaemonError::LockFailed(_)) => Err(e),
        Err(e) => {
            cleanup_on_failure(config);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &DaemonConfig) -> Result<DaemonState, DaemonError> {
    // 1. Acquire lock file FIRST - prevents races
    std::fs::create_dir_all(&config.state_dir)?;
    let mut lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(DaemonError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // 2. Load definitions
    std::fs::create_dir_all(&config.data_dir)?;
    let instances = InstanceRegistry::open(&config.data_dir, config.persist_window)?;
    let tasks = TaskRegistry::open(&config.data_dir)?;
    info!(
        "Loaded {} instances and {} tasks from {}",
        instances.len(),
        tasks.len(),
        config.data_dir.display()
    );

    // 3. Wire the orchestrator and task engine
    let pipe = match &config.shell {
        Some(shell) => PipeSessionProvider::with_shell(shell.clone()),
        None => PipeSessionProvider::new(),
    };
    let bus = EventBus::new();
    tokio::spawn(log_events(bus.subscribe()));

    let orchestrator = Orchestrator::new(
        instances,
        TracedSessionProvider::new(pipe),
        SystemClock,
        UuidIdGen,
        bus,
        config.lifecycle(),
    );
    let engine = TaskEngine::new(
        tasks,
        orchestrator.clone(),
        SystemClock,
        UuidIdGen,
        config.task_engine(),
    );

    // 4. Remove stale socket and bind (LAST - only after all validation passes)
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| DaemonError::BindFailed(config.socket_path.clone(), e))?;

    // 5. Arm timers and bring up auto-start instances in the background
    engine.start();
    let auto = orchestrator.clone();
    tokio::spawn(async move {
        let started = auto.start_auto().await;
        info!("Auto-started {} instances", started);
    });

    let (shutdown, shutdown_requests) = mpsc::channel(1);
    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        listener,
        context: Context {
            orchestrator,
            engine,
            started: Instant::now(),
            shutdown,
        },
        shutdown_requests,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &DaemonConfig) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

/// Log everything published on the event bus
async fn log_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match &event {
            Event::InstanceStatusChanged {
                instance_id,
                state,
                error,
            } => info!(%instance_id, %state, ?error, "instance status"),
            Event::InstanceOutput { instance_id, data } => {
                tracing::trace!(%instance_id, bytes = data.len(), "instance output")
            }
            Event::InstanceWarning {
                instance_id,
                message,
            } => warn!(%instance_id, warning = %message, "instance warning"),
            Event::InstanceDeleted { instance_id } => info!(%instance_id, "instance deleted"),
            Event::TaskExecuted {
                task_id,
                instance_id,
                success: true,
                ..
            } => info!(%task_id, %instance_id, "task executed"),
            Event::TaskExecuted {
                task_id,
                instance_id,
                error,
                ..
            } => warn!(%task_id, %instance_id, ?error, "task failed"),
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
