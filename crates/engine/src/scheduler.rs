// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled task engine
//!
//! Every enabled task owns one timer: a tokio task sleeping until the task's
//! `next_run`. Each armed timer carries a generation number; a firing whose
//! generation no longer matches the armed one is stale and dropped. After a
//! firing the task's run stamps are persisted and the timer is rearmed from
//! the new `next_run`, so missed occurrences are never replayed.
//!
//! Firings hold a read guard on the `firing` lock while they run. Shutdown
//! raises the stop flag and then takes the write side, so it returns only
//! once every firing already under way has finished, and nothing is armed
//! after it.

use crate::config::TaskEngineConfig;
use crate::error::TaskError;
use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Utc};
use keeper_adapters::SessionProvider;
use keeper_core::{
    Clock, CronSchedule, Event, IdGen, InstanceId, PowerAction, ScheduledTask, TaskAction,
    TaskDraft, TaskId, TaskPatch,
};
use keeper_storage::TaskRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct EngineInner<P, C, I> {
    registry: TaskRegistry,
    orchestrator: Orchestrator<P, C, I>,
    clock: C,
    ids: I,
    config: TaskEngineConfig,
    timers: Mutex<HashMap<TaskId, ArmedTimer>>,
    generation: AtomicU64,
    stopped: AtomicBool,
    firing: RwLock<()>,
}

/// Runs cron-triggered power actions and commands against instances
pub struct TaskEngine<P, C, I> {
    inner: Arc<EngineInner<P, C, I>>,
}

impl<P, C, I> Clone for TaskEngine<P, C, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C, I> TaskEngine<P, C, I>
where
    P: SessionProvider,
    C: Clock,
    I: IdGen,
{
    pub fn new(
        registry: TaskRegistry,
        orchestrator: Orchestrator<P, C, I>,
        clock: C,
        ids: I,
        config: TaskEngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                orchestrator,
                clock,
                ids,
                config,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                firing: RwLock::new(()),
            }),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TaskId, ArmedTimer>> {
        self.inner.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next occurrence of `schedule` after now, in the configured zone
    pub fn next_run_time(&self, schedule: &str) -> Result<Option<DateTime<Utc>>, TaskError> {
        Ok(keeper_core::next_run_time(
            schedule,
            self.inner.clock.now(),
            self.inner.config.timezone,
        )?)
    }

    fn next_after(&self, schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        schedule.next_after(after, self.inner.config.timezone)
    }

    /// Next occurrence of the task as currently stored, `None` when disabled
    fn next_for(&self, task: &ScheduledTask, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !task.enabled {
            return None;
        }
        match CronSchedule::parse(&task.schedule) {
            Ok(schedule) => self.next_after(&schedule, after),
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "task has invalid schedule");
                None
            }
        }
    }

    // -- boot and shutdown ---------------------------------------------------

    /// Arm every enabled task, recomputing `next_run` from now
    ///
    /// Occurrences missed while the daemon was down are skipped. Returns the
    /// number of armed timers.
    pub fn start(&self) -> usize {
        let now = self.inner.clock.now();
        for task in self.inner.registry.list() {
            if !task.enabled {
                continue;
            }
            let next_run = match CronSchedule::parse(&task.schedule) {
                Ok(schedule) => self.next_after(&schedule, now),
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "stored task has invalid schedule");
                    continue;
                }
            };
            match self
                .inner
                .registry
                .update(&task.id, |t| t.next_run = next_run)
            {
                Ok(Some(updated)) => self.arm(&updated),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "failed to persist next run");
                    self.arm(&ScheduledTask { next_run, ..task });
                }
            }
        }
        let armed = self.armed_count();
        tracing::info!(armed, "task engine started");
        armed
    }

    /// Cancel every timer and wait for firings already under way
    ///
    /// Nothing is armed once this returns, including by those firings.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let timers: Vec<ArmedTimer> = self.timers().drain().map(|(_, t)| t).collect();
        for timer in &timers {
            timer.handle.abort();
        }
        let _drained = self.inner.firing.write().await;
        tracing::info!(disarmed = timers.len(), "task engine stopped");
    }

    fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    // -- timers --------------------------------------------------------------

    /// Whether a timer is armed for the task
    pub fn is_armed(&self, id: &TaskId) -> bool {
        self.timers().contains_key(id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers().len()
    }

    fn disarm(&self, id: &TaskId) {
        if let Some(timer) = self.timers().remove(id) {
            timer.handle.abort();
            tracing::debug!(task_id = %id, generation = timer.generation, "timer disarmed");
        }
    }

    /// Replace the task's timer with one for its current `next_run`
    fn arm(&self, task: &ScheduledTask) {
        self.disarm(&task.id);
        if !task.enabled || self.is_stopped() {
            return;
        }
        let Some(next_run) = task.next_run else {
            tracing::info!(task_id = %task.id, schedule = %task.schedule, "no future occurrence, not armed");
            return;
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = (next_run - self.inner.clock.now())
            .to_std()
            .unwrap_or_default();
        let engine = self.clone();
        let id = task.id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.fire(&id, generation, next_run).await;
        });

        tracing::debug!(task_id = %task.id, generation, %next_run, "timer armed");
        self.timers().insert(
            task.id.clone(),
            ArmedTimer { generation, handle },
        );
    }

    async fn fire(&self, id: &TaskId, generation: u64, scheduled_for: DateTime<Utc>) {
        let _firing = self.inner.firing.read().await;
        if self.is_stopped() {
            return;
        }
        // Claim the slot so rearming does not abort this very task
        {
            let mut timers = self.timers();
            match timers.get(id) {
                Some(timer) if timer.generation == generation => {
                    timers.remove(id);
                }
                _ => {
                    tracing::debug!(task_id = %id, generation, "stale firing dropped");
                    return;
                }
            }
        }

        let Some(task) = self.inner.registry.get(id) else {
            return;
        };
        if !task.enabled {
            return;
        }
        tracing::info!(task_id = %id, action = %task.action, instance_id = %task.instance_id, "task firing");
        let _ = self.execute_guarded(task, Some(scheduled_for)).await;
    }

    async fn execute(
        &self,
        task: ScheduledTask,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        let _firing = self.inner.firing.read().await;
        self.execute_guarded(task, scheduled_for).await
    }

    /// Perform the task's action, then stamp, persist, announce and rearm
    ///
    /// The next run comes from the task as stored after the action, so a
    /// schedule edited while the action ran is the one that gets armed.
    async fn execute_guarded(
        &self,
        task: ScheduledTask,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        let result = self.perform(&task).await;
        if let Err(e) = &result {
            tracing::warn!(task_id = %task.id, error = %e, "task action failed");
        }

        let now = self.inner.clock.now();
        // Never compute the next occurrence from before the one just fired
        let from = scheduled_for.map_or(now, |at| now.max(at));
        let stamped = self.inner.registry.update(&task.id, |t| {
            t.last_run = Some(now);
            t.next_run = self.next_for(t, from);
        });

        self.inner
            .orchestrator
            .bus()
            .publish(Event::TaskExecuted {
                task_id: task.id.clone(),
                instance_id: task.instance_id.clone(),
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });

        match stamped {
            Ok(Some(updated)) => self.arm(&updated),
            // Deleted while running
            Ok(None) => {}
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "failed to persist run stamps");
                if let Some(current) = self.inner.registry.get(&task.id) {
                    self.arm(&ScheduledTask {
                        next_run: self.next_for(&current, from),
                        ..current
                    });
                }
            }
        }

        result
    }

    async fn perform(&self, task: &ScheduledTask) -> Result<(), TaskError> {
        let orchestrator = &self.inner.orchestrator;
        let instance_id = &task.instance_id;
        match &task.action {
            TaskAction::Power { action } => match action {
                PowerAction::Start => orchestrator.start(instance_id).await.map(|_| ())?,
                PowerAction::Stop => orchestrator.stop(instance_id).await?,
                PowerAction::Restart => orchestrator.restart(instance_id).await.map(|_| ())?,
            },
            TaskAction::Command { command } => {
                let mut line = command.clone();
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                if !orchestrator.send_input(instance_id, &line).await? {
                    return Err(TaskError::InstanceNotRunning(instance_id.clone()));
                }
                // Some consoles only act on a second Enter
                tokio::time::sleep(self.inner.config.command_enter_delay).await;
                orchestrator.send_input(instance_id, "\n").await?;
            }
        }
        Ok(())
    }

    // -- task CRUD -----------------------------------------------------------

    fn require(&self, id: &TaskId) -> Result<ScheduledTask, TaskError> {
        self.inner
            .registry
            .get(id)
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    fn instance_name(&self, id: &InstanceId) -> Result<String, TaskError> {
        self.inner
            .orchestrator
            .definition(id)
            .map(|def| def.name)
            .ok_or_else(|| TaskError::InstanceNotFound(id.clone()))
    }

    /// Validate, persist and (if enabled) arm a new task
    pub fn create_task(&self, draft: TaskDraft) -> Result<ScheduledTask, TaskError> {
        let schedule = CronSchedule::parse(&draft.schedule)?;
        let instance_name = self.instance_name(&draft.instance_id)?;

        let now = self.inner.clock.now();
        let next_run = if draft.enabled {
            self.next_after(&schedule, now)
        } else {
            None
        };
        let task = ScheduledTask {
            id: self.inner.ids.task_id(),
            name: draft.name.trim().to_string(),
            instance_id: draft.instance_id,
            instance_name,
            action: draft.action,
            schedule: schedule.expression().to_string(),
            enabled: draft.enabled,
            next_run,
            last_run: None,
            created_at: now,
            updated_at: now,
        };

        self.inner.registry.insert(task.clone())?;
        self.arm(&task);
        tracing::info!(task_id = %task.id, schedule = %task.schedule, action = %task.action, "task created");
        Ok(task)
    }

    /// Edit a task. Nothing changes if the new schedule or target is invalid.
    pub fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<ScheduledTask, TaskError> {
        let current = self.require(id)?;
        let schedule = match &patch.schedule {
            Some(expression) => Some(CronSchedule::parse(expression)?),
            None => None,
        };
        let instance_name = match &patch.instance_id {
            Some(instance_id) => Some(self.instance_name(instance_id)?),
            None => None,
        };

        let now = self.inner.clock.now();
        let schedule_changed = patch.changes_schedule(&current);
        let enabled = patch.enabled.unwrap_or(current.enabled);
        let newly_enabled = enabled && !current.enabled;
        // A run that is already due is being fired; arm the one after it
        let due = current.next_run.is_none_or(|at| at <= now);
        let next_run = if !enabled {
            None
        } else if schedule_changed || newly_enabled || due {
            let parsed = match &schedule {
                Some(parsed) => parsed.clone(),
                None => CronSchedule::parse(&current.schedule)?,
            };
            self.next_after(&parsed, now)
        } else {
            current.next_run
        };

        self.disarm(id);
        let updated = self.inner.registry.update(id, |task| {
            if let Some(name) = &patch.name {
                task.name = name.trim().to_string();
            }
            if let (Some(instance_id), Some(instance_name)) = (&patch.instance_id, instance_name) {
                task.instance_id = instance_id.clone();
                task.instance_name = instance_name;
            }
            if let Some(action) = &patch.action {
                task.action = action.clone();
            }
            if let Some(schedule) = &schedule {
                task.schedule = schedule.expression().to_string();
            }
            task.enabled = enabled;
            task.next_run = next_run;
            task.updated_at = now;
        });

        match updated {
            Ok(Some(task)) => {
                self.arm(&task);
                tracing::info!(task_id = %id, "task updated");
                Ok(task)
            }
            Ok(None) => Err(TaskError::NotFound(id.clone())),
            Err(e) => {
                self.arm(&current);
                Err(e.into())
            }
        }
    }

    /// Cancel the timer and remove the task
    pub fn delete_task(&self, id: &TaskId) -> Result<ScheduledTask, TaskError> {
        self.require(id)?;
        self.disarm(id);
        match self.inner.registry.remove(id)? {
            Some(task) => {
                tracing::info!(task_id = %id, "task deleted");
                Ok(task)
            }
            None => Err(TaskError::NotFound(id.clone())),
        }
    }

    /// Enable or disable a task without deleting it
    ///
    /// Enabling recomputes `next_run` from now.
    pub fn toggle_task(&self, id: &TaskId, enabled: bool) -> Result<ScheduledTask, TaskError> {
        let current = self.require(id)?;
        let next_run = if enabled {
            self.next_after(&CronSchedule::parse(&current.schedule)?, self.inner.clock.now())
        } else {
            None
        };

        self.disarm(id);
        let now = self.inner.clock.now();
        let updated = self.inner.registry.update(id, |task| {
            task.enabled = enabled;
            task.next_run = next_run;
            task.updated_at = now;
        });
        match updated {
            Ok(Some(task)) => {
                self.arm(&task);
                tracing::info!(task_id = %id, enabled, "task toggled");
                Ok(task)
            }
            Ok(None) => Err(TaskError::NotFound(id.clone())),
            Err(e) => {
                self.arm(&current);
                Err(e.into())
            }
        }
    }

    /// Execute a task's action immediately through the regular firing path
    pub async fn run_task_now(&self, id: &TaskId) -> Result<(), TaskError> {
        let task = self.require(id)?;
        tracing::info!(task_id = %id, action = %task.action, "running task now");
        self.execute(task, None).await
    }

    // -- reads ---------------------------------------------------------------

    pub fn get_task(&self, id: &TaskId) -> Option<ScheduledTask> {
        self.inner.registry.get(id)
    }

    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.inner.registry.list()
    }

    pub fn tasks_for_instance(&self, instance_id: &InstanceId) -> Vec<ScheduledTask> {
        self.inner.registry.for_instance(instance_id)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
