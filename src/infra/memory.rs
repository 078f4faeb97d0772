//! In-process implementations of the persistence ports.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{Lease, LeaseStore, LogStore, StoreError, TaskStore};
use crate::domain::log::LogEntry;
use crate::domain::task::{Task, UpsertMode};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "infra::memory";

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<BTreeMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn upsert(&self, task: Task, mode: UpsertMode) -> Result<Task, StoreError> {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "task.upsert");
        let previous = tasks.get(&task.dedup_key).cloned();
        let stored = task.merged_over(previous.as_ref(), mode);
        tasks.insert(stored.dedup_key.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, dedup_key: &str) -> Result<Option<Task>, StoreError> {
        Ok(mutex_lock(&self.tasks, SOURCE, "task.get")
            .get(dedup_key)
            .cloned())
    }

    async fn remove(&self, dedup_key: &str) -> Result<Option<Task>, StoreError> {
        Ok(mutex_lock(&self.tasks, SOURCE, "task.remove").remove(dedup_key))
    }

    async fn remove_if_current(&self, dedup_key: &str, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "task.remove_if_current");
        if tasks.get(dedup_key).is_some_and(|task| task.id == id) {
            tasks.remove(dedup_key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn replace_if_current(&self, task: &Task) -> Result<bool, StoreError> {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "task.replace_if_current");
        match tasks.get_mut(&task.dedup_key) {
            Some(existing) if existing.id == task.id => {
                *existing = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(mutex_lock(&self.tasks, SOURCE, "task.all")
            .values()
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "task.clear");
        let removed = tasks.len();
        tasks.clear();
        Ok(removed)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    lease: Mutex<Option<Lease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(
        &self,
        now: OffsetDateTime,
        timeout: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        let mut slot = mutex_lock(&self.lease, SOURCE, "lease.try_acquire");
        if slot.as_ref().is_some_and(|held| !held.is_expired(now, timeout)) {
            return Ok(None);
        }
        let lease = Lease::new(now);
        *slot = Some(lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        let mut slot = mutex_lock(&self.lease, SOURCE, "lease.release");
        if slot.as_ref().is_some_and(|held| held.token == lease.token) {
            *slot = None;
        }
        Ok(())
    }

    async fn current(&self) -> Result<Option<Lease>, StoreError> {
        Ok(mutex_lock(&self.lease, SOURCE, "lease.current").clone())
    }

    async fn force_clear(&self) -> Result<(), StoreError> {
        *mutex_lock(&self.lease, SOURCE, "lease.force_clear") = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn prepend(&self, entry: LogEntry, capacity: usize) -> Result<(), StoreError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "log.prepend");
        entries.insert(0, entry);
        entries.truncate(capacity);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        Ok(mutex_lock(&self.entries, SOURCE, "log.entries").clone())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        mutex_lock(&self.entries, SOURCE, "log.clear").clear();
        Ok(())
    }
}
