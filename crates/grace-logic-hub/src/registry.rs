//! The Hub's exclusive-owner registry of `LogicUpdate`s, plus the per-target-component
//! serialization locks that keep two updates to the same component from racing each other
//! through the pipeline.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::types::LogicUpdate;

#[derive(Default)]
pub struct UpdateRegistry {
    updates: DashMap<String, LogicUpdate>,
    component_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UpdateRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, update: LogicUpdate) {
        self.updates.insert(update.update_id.clone(), update);
    }

    pub fn get(&self, update_id: &str) -> Option<LogicUpdate> {
        self.updates.get(update_id).map(|u| u.clone())
    }

    pub fn update_with<F>(&self, update_id: &str, f: F)
    where
        F: FnOnce(&mut LogicUpdate),
    {
        if let Some(mut entry) = self.updates.get_mut(update_id) {
            f(&mut entry);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<LogicUpdate> {
        let mut all: Vec<LogicUpdate> = self.updates.iter().map(|u| u.clone()).collect();
        all.sort_by_key(|u| std::cmp::Reverse(u.created_at));
        all.truncate(limit);
        all
    }

    pub fn all(&self) -> Vec<LogicUpdate> {
        self.updates.iter().map(|u| u.clone()).collect()
    }

    /// Acquires the serialization lock for every targeted component. A second update
    /// targeting the same component waits here until the first reaches a terminal stage.
    pub fn lock_for(&self, component_id: &str) -> Arc<Mutex<()>> {
        self.component_locks
            .entry(component_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
