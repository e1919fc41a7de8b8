// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance lifecycle orchestrator
//!
//! Owns the live status of every instance and drives the state machine
//!
//! ```text
//! stopped/error -> starting -> running -> stopping -> stopped
//!                      \                      \
//!                       -> error               -> (grace expires) force-close -> stopped
//! ```
//!
//! Two locks are involved. A per-instance async mutex serializes start,
//! stop, restart, update and delete for one id, and is held across provider
//! calls. The status table sits behind a plain mutex that is only held for
//! short synchronous sections and is the only thing session callbacks and
//! grace timers touch. Callbacks act only when the session id they carry is
//! still the bound one.

use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::sink::{InstanceSink, Readiness};
use keeper_adapters::{SessionError, SessionProvider, SessionSink};
use keeper_core::{
    Clock, Event, EventBus, IdGen, InstanceDef, InstanceDraft, InstanceId, InstancePatch,
    InstanceSnapshot, InstanceState, InstanceStatus,
};
use keeper_storage::InstanceRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

pub(crate) struct Inner<P, C, I> {
    pub(crate) registry: InstanceRegistry,
    pub(crate) provider: P,
    pub(crate) clock: C,
    ids: I,
    pub(crate) bus: EventBus,
    pub(crate) config: LifecycleConfig,
    statuses: Mutex<HashMap<InstanceId, InstanceStatus>>,
    op_locks: Mutex<HashMap<InstanceId, Arc<tokio::sync::Mutex<()>>>>,
    /// Start calls waiting for their session's first report, by session id
    pending: Mutex<HashMap<String, oneshot::Sender<Readiness>>>,
}

/// Starts, stops and restarts instances through a session provider
pub struct Orchestrator<P, C, I> {
    inner: Arc<Inner<P, C, I>>,
}

impl<P, C, I> Clone for Orchestrator<P, C, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<P, C, I> Inner<P, C, I>
where
    P: SessionProvider,
    C: Clock,
    I: IdGen,
{
    pub(crate) fn statuses(&self) -> MutexGuard<'_, HashMap<InstanceId, InstanceStatus>> {
        lock(&self.statuses)
    }

    /// Hand a session's first report to the start call waiting on it
    ///
    /// Returns false when nobody is waiting (start already gave up).
    pub(crate) fn resolve_pending(&self, session_id: &str, readiness: Readiness) -> bool {
        match lock(&self.pending).remove(session_id) {
            Some(tx) => {
                let _ = tx.send(readiness);
                true
            }
            None => false,
        }
    }

    pub(crate) fn publish_status(&self, id: &InstanceId, status: &InstanceStatus) {
        let error = match status.state {
            InstanceState::Error => status.last_error.clone(),
            _ => None,
        };
        self.bus.publish(Event::InstanceStatusChanged {
            instance_id: id.clone(),
            state: status.state,
            error,
        });
    }

    /// Apply `change` to the status bound to `session_id`
    ///
    /// Returns the new status, or `None` if the session is no longer bound.
    pub(crate) fn update_bound(
        &self,
        id: &InstanceId,
        session_id: &str,
        change: impl FnOnce(&mut InstanceStatus),
    ) -> Option<InstanceStatus> {
        let mut statuses = self.statuses();
        let status = statuses.get_mut(id)?;
        if !status.is_bound_to(session_id) {
            return None;
        }
        change(status);
        Some(status.clone())
    }

    /// Record a transition made on behalf of a session: emit and persist
    pub(crate) fn transitioned(&self, id: &InstanceId, status: &InstanceStatus) {
        tracing::info!(instance_id = %id, state = %status.state, "instance state changed");
        self.publish_status(id, status);
        self.registry.schedule_persist();
    }
}

impl<P, C, I> Orchestrator<P, C, I>
where
    P: SessionProvider,
    C: Clock,
    I: IdGen,
{
    /// Build an orchestrator over the registered instances
    ///
    /// Every instance starts out `stopped`.
    pub fn new(
        registry: InstanceRegistry,
        provider: P,
        clock: C,
        ids: I,
        bus: EventBus,
        config: LifecycleConfig,
    ) -> Self {
        let statuses = registry
            .list()
            .into_iter()
            .map(|def| (def.id, InstanceStatus::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                registry,
                provider,
                clock,
                ids,
                bus,
                config,
                statuses: Mutex::new(statuses),
                op_locks: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    fn op_lock(&self, id: &InstanceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = lock(&self.inner.op_locks);
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    fn require(&self, id: &InstanceId) -> Result<InstanceDef, LifecycleError> {
        self.inner
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    // -- definitions ---------------------------------------------------------

    /// Register a new instance. It starts out `stopped`.
    pub fn create_instance(&self, draft: InstanceDraft) -> Result<InstanceDef, LifecycleError> {
        let id = self.inner.ids.instance_id();
        let def = draft.into_def(id.clone(), self.inner.clock.now())?;
        self.inner.statuses().insert(id.clone(), InstanceStatus::default());
        self.inner.registry.insert(def.clone());
        tracing::info!(instance_id = %id, name = %def.name, "instance created");
        Ok(def)
    }

    /// Edit a definition. Only allowed while `stopped` or `error`.
    pub async fn update_instance(
        &self,
        id: &InstanceId,
        patch: InstancePatch,
    ) -> Result<InstanceDef, LifecycleError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;

        let def = self.require(id)?;
        if !self.state(id).is_settled() {
            return Err(LifecycleError::NotStopped(id.clone()));
        }
        let next = patch.apply(&def, self.inner.clock.now())?;
        self.inner.registry.replace(next.clone());
        tracing::info!(instance_id = %id, "instance updated");
        Ok(next)
    }

    /// Remove an instance, stopping it first if needed
    pub async fn delete_instance(&self, id: &InstanceId) -> Result<InstanceDef, LifecycleError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;

        self.require(id)?;
        if self.state(id) == InstanceState::Running {
            self.stop_locked(id).await?;
        }
        self.wait_settled(id).await;

        let def = self
            .inner
            .registry
            .remove(id)
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
        self.inner.statuses().remove(id);
        lock(&self.inner.op_locks).remove(id);
        self.inner.bus.publish(Event::InstanceDeleted {
            instance_id: id.clone(),
        });
        tracing::info!(instance_id = %id, "instance deleted");
        Ok(def)
    }

    // -- reads ---------------------------------------------------------------

    fn state(&self, id: &InstanceId) -> InstanceState {
        self.inner
            .statuses()
            .get(id)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn definition(&self, id: &InstanceId) -> Option<InstanceDef> {
        self.inner.registry.get(id)
    }

    /// Live status of one instance
    pub fn status(&self, id: &InstanceId) -> Result<InstanceStatus, LifecycleError> {
        self.require(id)?;
        Ok(self.inner.statuses().get(id).cloned().unwrap_or_default())
    }

    pub fn snapshot(&self, id: &InstanceId) -> Result<InstanceSnapshot, LifecycleError> {
        let def = self.require(id)?;
        let status = self.inner.statuses().get(id).cloned().unwrap_or_default();
        Ok(InstanceSnapshot { def, status })
    }

    /// Every instance with its live status, in registration order
    pub fn list(&self) -> Vec<InstanceSnapshot> {
        let defs = self.inner.registry.list();
        let statuses = self.inner.statuses();
        defs.into_iter()
            .map(|def| {
                let status = statuses.get(&def.id).cloned().unwrap_or_default();
                InstanceSnapshot { def, status }
            })
            .collect()
    }

    // -- lifecycle -----------------------------------------------------------

    /// Start an instance, returning the id of its new session
    pub async fn start(&self, id: &InstanceId) -> Result<String, LifecycleError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;
        self.start_locked(id).await
    }

    async fn start_locked(&self, id: &InstanceId) -> Result<String, LifecycleError> {
        let def = self.require(id)?;
        match self.state(id) {
            InstanceState::Running => return Err(LifecycleError::AlreadyRunning(id.clone())),
            InstanceState::Starting => return Err(LifecycleError::AlreadyStarting(id.clone())),
            InstanceState::Stopping => return Err(LifecycleError::AlreadyStopping(id.clone())),
            InstanceState::Stopped | InstanceState::Error => {}
        }
        if !def.working_dir.is_dir() {
            return Err(LifecycleError::InvalidWorkingDirectory(
                def.working_dir.clone(),
            ));
        }

        let inner = &self.inner;
        let session_id = inner.ids.next();
        let (ready_tx, ready_rx) = oneshot::channel();
        lock(&inner.pending).insert(session_id.clone(), ready_tx);

        let status = {
            let mut statuses = inner.statuses();
            let status = statuses.entry(id.clone()).or_default();
            status.begin_start(session_id.clone());
            status.clone()
        };
        tracing::info!(instance_id = %id, session_id, "starting instance");
        inner.publish_status(id, &status);

        let sink: Arc<dyn SessionSink> =
            Arc::new(InstanceSink::new(id.clone(), Arc::downgrade(inner)));
        if let Err(e) = inner
            .provider
            .create(&session_id, inner.config.terminal_size, &def.working_dir, sink)
            .await
        {
            lock(&inner.pending).remove(&session_id);
            self.fail_start(id, &session_id, e.to_string());
            return Err(LifecycleError::Session(e));
        }

        let readiness = tokio::time::timeout(inner.config.ready_timeout, ready_rx).await;
        lock(&inner.pending).remove(&session_id);

        let pid = match readiness {
            Ok(Ok(Readiness::Ready(pid))) => pid,
            Ok(Ok(Readiness::Failed(message))) => {
                self.fail_start(id, &session_id, message.clone());
                self.close_session(&session_id).await;
                return Err(LifecycleError::Session(SessionError::SpawnFailed(message)));
            }
            Ok(Ok(Readiness::Exited(code))) => {
                let message = format!("session exited before it was ready (code {:?})", code);
                self.fail_start(id, &session_id, message.clone());
                return Err(LifecycleError::Session(SessionError::SpawnFailed(message)));
            }
            Ok(Err(_)) => {
                let message = "session dropped before it was ready".to_string();
                self.fail_start(id, &session_id, message.clone());
                return Err(LifecycleError::Session(SessionError::SpawnFailed(message)));
            }
            Err(_) => {
                let timeout = inner.config.ready_timeout;
                self.fail_start(
                    id,
                    &session_id,
                    format!("session was not ready within {:?}", timeout),
                );
                self.close_session(&session_id).await;
                return Err(LifecycleError::SessionCreationTimeout {
                    id: id.clone(),
                    timeout,
                });
            }
        };

        match def.start_line() {
            Some(line) => {
                if let Err(e) = inner.provider.write(&session_id, line.as_bytes()).await {
                    self.fail_start(id, &session_id, format!("failed to send start command: {}", e));
                    self.close_session(&session_id).await;
                    return Err(LifecycleError::Session(e));
                }
            }
            None => {
                let message = "no start command configured; session opened without one";
                tracing::warn!(instance_id = %id, message);
                inner.bus.publish(Event::InstanceWarning {
                    instance_id: id.clone(),
                    message: message.to_string(),
                });
            }
        }

        let now = inner.clock.now();
        let status = inner.update_bound(id, &session_id, |status| {
            if status.state == InstanceState::Starting {
                status.mark_running(pid, now);
            }
        });
        match status {
            Some(status) if status.state == InstanceState::Running => {
                inner.transitioned(id, &status);
                Ok(session_id)
            }
            _ => Err(LifecycleError::Session(SessionError::SpawnFailed(
                "session ended while starting".to_string(),
            ))),
        }
    }

    /// Move a failed start to `error`, if the session is still bound
    fn fail_start(&self, id: &InstanceId, session_id: &str, message: String) {
        tracing::warn!(instance_id = %id, session_id, error = %message, "start failed");
        if let Some(status) = self
            .inner
            .update_bound(id, session_id, |status| status.mark_error(message))
        {
            self.inner.transitioned(id, &status);
        }
    }

    async fn close_session(&self, session_id: &str) {
        if let Err(e) = self.inner.provider.close(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to close session");
        }
    }

    /// Ask a running instance to stop
    ///
    /// Returns once the stop payload is written. The instance reaches
    /// `stopped` when the process exits, or when the grace period runs out
    /// and the session is force-closed.
    pub async fn stop(&self, id: &InstanceId) -> Result<(), LifecycleError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;
        self.stop_locked(id).await
    }

    async fn stop_locked(&self, id: &InstanceId) -> Result<(), LifecycleError> {
        let def = self.require(id)?;
        let inner = &self.inner;

        let (session_id, status) = {
            let mut statuses = inner.statuses();
            let status = statuses.entry(id.clone()).or_default();
            if status.state != InstanceState::Running {
                return Err(LifecycleError::NotRunning(id.clone()));
            }
            let session_id = status
                .session_id
                .clone()
                .ok_or_else(|| LifecycleError::MissingSession(id.clone()))?;
            status.begin_stop();
            (session_id, status.clone())
        };
        tracing::info!(
            instance_id = %id,
            session_id,
            strategy = %def.stop_strategy,
            "stopping instance"
        );
        inner.publish_status(id, &status);

        self.arm_grace_timer(id.clone(), session_id.clone());

        if let Err(e) = inner
            .provider
            .write(&session_id, def.stop_strategy.payload())
            .await
        {
            // The grace timer still guarantees the stop
            tracing::warn!(instance_id = %id, error = %e, "failed to send stop payload");
        }
        Ok(())
    }

    /// Force-close the session if the instance is still stopping on it later
    fn arm_grace_timer(&self, id: InstanceId, session_id: String) {
        let orchestrator = self.clone();
        let grace = self.inner.config.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let inner = &orchestrator.inner;
            let now = inner.clock.now();
            let status = inner.update_bound(&id, &session_id, |status| {
                if status.state == InstanceState::Stopping {
                    status.mark_stopped(now);
                }
            });
            let Some(status) = status.filter(|s| s.state == InstanceState::Stopped) else {
                return;
            };

            tracing::warn!(
                instance_id = %id,
                session_id,
                grace_ms = grace.as_millis() as u64,
                "grace period expired, force-closing session"
            );
            inner.transitioned(&id, &status);
            orchestrator.close_session(&session_id).await;
        });
    }

    /// Stop (if running), wait for the stop to land, pause, then start
    pub async fn restart(&self, id: &InstanceId) -> Result<String, LifecycleError> {
        let op = self.op_lock(id);
        let _guard = op.lock().await;

        self.require(id)?;
        if self.state(id) == InstanceState::Running {
            tracing::info!(instance_id = %id, "restarting instance");
            self.stop_locked(id).await?;
            self.wait_settled(id).await;
            tokio::time::sleep(self.inner.config.restart_settle_delay).await;
        }
        self.start_locked(id).await
    }

    /// Poll until the instance is `stopped` or `error`
    async fn wait_settled(&self, id: &InstanceId) {
        loop {
            let settled = self
                .inner
                .statuses()
                .get(id)
                .is_none_or(|s| s.state.is_settled());
            if settled {
                return;
            }
            tokio::time::sleep(self.inner.config.restart_poll_interval).await;
        }
    }

    /// Forward raw text into a running instance's session
    ///
    /// Returns `Ok(false)` when the instance is not running.
    pub async fn send_input(&self, id: &InstanceId, text: &str) -> Result<bool, LifecycleError> {
        self.require(id)?;
        let session_id = {
            let statuses = self.inner.statuses();
            match statuses.get(id) {
                Some(status) if status.state == InstanceState::Running => status.session_id.clone(),
                _ => None,
            }
        };
        let Some(session_id) = session_id else {
            return Ok(false);
        };
        self.inner
            .provider
            .write(&session_id, text.as_bytes())
            .await?;
        Ok(true)
    }

    /// Start every auto-start instance in registration order
    ///
    /// Failures are logged and do not stop the sweep. Returns how many started.
    pub async fn start_auto(&self) -> usize {
        let mut started = 0;
        for def in self.inner.registry.list() {
            if !def.auto_start {
                continue;
            }
            match self.start(&def.id).await {
                Ok(_) => started += 1,
                Err(e) => {
                    tracing::warn!(instance_id = %def.id, error = %e, "auto-start failed")
                }
            }
        }
        started
    }

    /// Stop every running instance, wait for them to settle, flush the registry
    ///
    /// Each instance's operation lock is taken first, so one that is starting
    /// or restarting is stopped once that operation lands.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let ids: Vec<InstanceId> = self.inner.registry.list().into_iter().map(|d| d.id).collect();
        let mut stopped = 0;
        for id in &ids {
            let op = self.op_lock(id);
            let _guard = op.lock().await;
            if self.state(id) != InstanceState::Running {
                continue;
            }
            match self.stop_locked(id).await {
                Ok(()) => stopped += 1,
                Err(e) => {
                    tracing::warn!(instance_id = %id, error = %e, "stop during shutdown failed")
                }
            }
        }
        tracing::info!(count = stopped, "stop sent to running instances");

        loop {
            let stopping = self
                .inner
                .statuses()
                .values()
                .any(|s| s.state == InstanceState::Stopping);
            if !stopping {
                break;
            }
            tokio::time::sleep(self.inner.config.restart_poll_interval).await;
        }

        self.inner.registry.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
