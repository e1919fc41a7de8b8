// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance registry: durable instance definitions

use crate::coalesce::CoalescedWriter;
use crate::error::StoreError;
use crate::json_list::{load_list, save_list};
use keeper_core::{InstanceDef, InstanceId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// File name of the instance list inside the data directory
pub const INSTANCES_FILE: &str = "instances.json";

/// Durable instance definitions in registration order
///
/// Mutations update memory immediately and request a coalesced write of
/// `instances.json`. Live status is never stored here.
#[derive(Clone)]
pub struct InstanceRegistry {
    path: PathBuf,
    defs: Arc<RwLock<Vec<InstanceDef>>>,
    writer: CoalescedWriter,
}

impl InstanceRegistry {
    /// Load `instances.json` from `data_dir` and start the writer task
    pub fn open(data_dir: &Path, window: Duration) -> Result<Self, StoreError> {
        let path = data_dir.join(INSTANCES_FILE);
        let loaded: Vec<InstanceDef> = load_list(&path)?;

        let mut seen = HashSet::new();
        let defs: Vec<InstanceDef> = loaded
            .into_iter()
            .filter(|def| {
                let fresh = seen.insert(def.id.clone());
                if !fresh {
                    tracing::warn!(instance_id = %def.id, "dropping duplicate instance definition");
                }
                fresh
            })
            .collect();
        tracing::info!(path = %path.display(), count = defs.len(), "loaded instances");

        let defs = Arc::new(RwLock::new(defs));
        let writer = {
            let defs = Arc::clone(&defs);
            let path = path.clone();
            CoalescedWriter::spawn("instances", window, move || {
                let snapshot = defs.read().unwrap_or_else(|e| e.into_inner()).clone();
                save_list(&path, &snapshot)
            })
        };

        Ok(Self { path, defs, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<InstanceDef>> {
        self.defs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<InstanceDef>> {
        self.defs.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &InstanceId) -> Option<InstanceDef> {
        self.read().iter().find(|def| &def.id == id).cloned()
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.read().iter().any(|def| &def.id == id)
    }

    /// All definitions in registration order
    pub fn list(&self) -> Vec<InstanceDef> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Register a new definition at the end of the list
    ///
    /// An existing definition with the same id is replaced in place.
    pub fn insert(&self, def: InstanceDef) {
        {
            let mut defs = self.write();
            match defs.iter_mut().find(|d| d.id == def.id) {
                Some(existing) => *existing = def,
                None => defs.push(def),
            }
        }
        self.schedule_persist();
    }

    /// Replace an existing definition. Returns false if the id is unknown.
    pub fn replace(&self, def: InstanceDef) -> bool {
        let replaced = {
            let mut defs = self.write();
            match defs.iter_mut().find(|d| d.id == def.id) {
                Some(existing) => {
                    *existing = def;
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.schedule_persist();
        }
        replaced
    }

    pub fn remove(&self, id: &InstanceId) -> Option<InstanceDef> {
        let removed = {
            let mut defs = self.write();
            let index = defs.iter().position(|d| &d.id == id)?;
            defs.remove(index)
        };
        self.schedule_persist();
        Some(removed)
    }

    /// Request a coalesced write of the current definitions
    pub fn schedule_persist(&self) {
        self.writer.schedule();
    }

    /// Write the current definitions now
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.writer.flush().await
    }

    /// Write pending changes and stop the writer task
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.writer.shutdown().await
    }
}

#[cfg(test)]
#[path = "instances_tests.rs"]
mod tests;
