// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task registry: durable scheduled task definitions

use crate::error::StoreError;
use crate::json_list::{load_list, save_list};
use keeper_core::{InstanceId, ScheduledTask, TaskId};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// File name of the task list inside the data directory
pub const TASKS_FILE: &str = "tasks.json";

/// Durable scheduled tasks
///
/// Every mutation writes `tasks.json` before it becomes visible. A failed
/// write leaves both the file and the in-memory list unchanged.
#[derive(Clone)]
pub struct TaskRegistry {
    path: PathBuf,
    tasks: Arc<RwLock<Vec<ScheduledTask>>>,
}

impl TaskRegistry {
    /// Load `tasks.json` from `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(TASKS_FILE);
        let tasks: Vec<ScheduledTask> = load_list(&path)?;
        tracing::info!(path = %path.display(), count = tasks.len(), "loaded tasks");
        Ok(Self {
            path,
            tasks: Arc::new(RwLock::new(tasks)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ScheduledTask>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `change` to a copy of the list, save it, then commit it
    fn mutate<R>(
        &self,
        change: impl FnOnce(&mut Vec<ScheduledTask>) -> R,
    ) -> Result<R, StoreError> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let mut next = tasks.clone();
        let result = change(&mut next);
        save_list(&self.path, &next)?;
        *tasks = next;
        Ok(result)
    }

    pub fn get(&self, id: &TaskId) -> Option<ScheduledTask> {
        self.read().iter().find(|t| &t.id == id).cloned()
    }

    pub fn list(&self) -> Vec<ScheduledTask> {
        self.read().clone()
    }

    /// Tasks targeting one instance
    pub fn for_instance(&self, instance_id: &InstanceId) -> Vec<ScheduledTask> {
        self.read()
            .iter()
            .filter(|t| &t.instance_id == instance_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn insert(&self, task: ScheduledTask) -> Result<(), StoreError> {
        self.mutate(|tasks| match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        })
    }

    /// Modify a task in place. Returns the updated task, or `None` if unknown.
    pub fn update(
        &self,
        id: &TaskId,
        change: impl FnOnce(&mut ScheduledTask),
    ) -> Result<Option<ScheduledTask>, StoreError> {
        if self.get(id).is_none() {
            return Ok(None);
        }
        self.mutate(|tasks| {
            let task = tasks.iter_mut().find(|t| &t.id == id)?;
            change(task);
            Some(task.clone())
        })
    }

    pub fn remove(&self, id: &TaskId) -> Result<Option<ScheduledTask>, StoreError> {
        if self.get(id).is_none() {
            return Ok(None);
        }
        self.mutate(|tasks| {
            let index = tasks.iter().position(|t| &t.id == id)?;
            Some(tasks.remove(index))
        })
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
