//! Persistence ports for queue, lease and build-log state.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::log::LogEntry;
use crate::domain::task::{Task, UpsertMode};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state io error at `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state at `{}` is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("background state task failed: {0}")]
    Background(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Pending tasks keyed by dedup key.
///
/// Implementations apply each mutation as one replace of the whole collection, so readers
/// never observe a half-written task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or overwrite by dedup key and return the task as stored.
    async fn upsert(&self, task: Task, mode: UpsertMode) -> Result<Task, StoreError>;

    async fn get(&self, dedup_key: &str) -> Result<Option<Task>, StoreError>;

    async fn remove(&self, dedup_key: &str) -> Result<Option<Task>, StoreError>;

    /// Remove the task only if the stored entry still carries `id`.
    async fn remove_if_current(&self, dedup_key: &str, id: Uuid) -> Result<bool, StoreError>;

    /// Overwrite the stored entry only if it still carries `task.id`.
    async fn replace_if_current(&self, task: &Task) -> Result<bool, StoreError>;

    async fn all(&self) -> Result<Vec<Task>, StoreError>;

    /// Drop every task, returning how many were removed.
    async fn clear(&self) -> Result<usize, StoreError>;
}

/// Single-flight marker held while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub acquired_at: OffsetDateTime,
}

impl Lease {
    pub fn new(acquired_at: OffsetDateTime) -> Self {
        Self {
            token: Uuid::new_v4(),
            acquired_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime, timeout: Duration) -> bool {
        now - self.acquired_at >= timeout
    }
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease unless a holder acquired it less than `timeout` ago.
    async fn try_acquire(
        &self,
        now: OffsetDateTime,
        timeout: Duration,
    ) -> Result<Option<Lease>, StoreError>;

    /// Release `lease` if it is still the current holder.
    async fn release(&self, lease: &Lease) -> Result<(), StoreError>;

    async fn current(&self) -> Result<Option<Lease>, StoreError>;

    /// Drop the lease regardless of holder.
    async fn force_clear(&self) -> Result<(), StoreError>;
}

/// Ring-buffered build log, most recent first.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Prepend `entry`, evicting the oldest entries beyond `capacity`.
    async fn prepend(&self, entry: LogEntry, capacity: usize) -> Result<(), StoreError>;

    async fn entries(&self) -> Result<Vec<LogEntry>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}
