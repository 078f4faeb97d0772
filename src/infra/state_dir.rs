//! File-backed queue, lease and log state.
//!
//! Layout inside the state directory:
//!
//! ```text
//! queue.json      pending tasks keyed by dedup key
//! lease.json      current batch lease, absent when idle
//! build-log.json  build log, most recent first
//! install-id      webhook installation id
//! ```
//!
//! Each mutation reads the whole file, applies the change and replaces the file through a
//! temp-file rename. Mutations are serialized within one process; separate processes
//! sharing a directory get last-writer-wins semantics.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{Lease, LeaseStore, LogStore, StoreError, TaskStore};
use crate::domain::log::LogEntry;
use crate::domain::task::{Task, UpsertMode};

pub const QUEUE_FILE: &str = "queue.json";
pub const LEASE_FILE: &str = "lease.json";
pub const LOG_FILE: &str = "build-log.json";
pub const INSTALL_ID_FILE: &str = "install-id";

/// Root of the persisted engine state.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| StoreError::io(&root, err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_store(&self) -> FileTaskStore {
        FileTaskStore {
            file: JsonFile::new(self.root.join(QUEUE_FILE)),
        }
    }

    pub fn lease_store(&self) -> FileLeaseStore {
        FileLeaseStore {
            file: JsonFile::new(self.root.join(LEASE_FILE)),
        }
    }

    pub fn log_store(&self) -> FileLogStore {
        FileLogStore {
            file: JsonFile::new(self.root.join(LOG_FILE)),
        }
    }

    /// Load the installation id, generating and persisting one on first use.
    pub async fn install_id(&self) -> Result<String, StoreError> {
        let path = self.root.join(INSTALL_ID_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(existing) if !existing.trim().is_empty() => return Ok(existing.trim().to_string()),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&path, err)),
        }

        let id = Uuid::new_v4().to_string();
        write_in_background(path, id.clone().into_bytes()).await?;
        info!(
            target = "restatic::state",
            op = "install_id",
            install_id = %id,
            "Generated installation id"
        );
        Ok(id)
    }
}

struct JsonFile {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    async fn load<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(StoreError::io(&self.path, err)),
        }
    }

    async fn save<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_in_background(self.path.clone(), bytes).await?;
        debug!(
            target = "restatic::state",
            op = "save",
            path = %self.path.display(),
            "State file replaced"
        );
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(&self.path, err)),
        }
    }
}

async fn write_in_background(path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|err| StoreError::Background(err.to_string()))?
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|err| StoreError::io(staged.path(), err))?;
    staged
        .persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

type TaskMap = BTreeMap<String, Task>;

pub struct FileTaskStore {
    file: JsonFile,
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn upsert(&self, task: Task, mode: UpsertMode) -> Result<Task, StoreError> {
        let _guard = self.file.guard.lock().await;
        let mut tasks: TaskMap = self.file.load().await?;
        let previous = tasks.get(&task.dedup_key).cloned();
        let stored = task.merged_over(previous.as_ref(), mode);
        tasks.insert(stored.dedup_key.clone(), stored.clone());
        self.file.save(&tasks).await?;
        Ok(stored)
    }

    async fn get(&self, dedup_key: &str) -> Result<Option<Task>, StoreError> {
        let mut tasks: TaskMap = self.file.load().await?;
        Ok(tasks.remove(dedup_key))
    }

    async fn remove(&self, dedup_key: &str) -> Result<Option<Task>, StoreError> {
        let _guard = self.file.guard.lock().await;
        let mut tasks: TaskMap = self.file.load().await?;
        let removed = tasks.remove(dedup_key);
        if removed.is_some() {
            self.file.save(&tasks).await?;
        }
        Ok(removed)
    }

    async fn remove_if_current(&self, dedup_key: &str, id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.file.guard.lock().await;
        let mut tasks: TaskMap = self.file.load().await?;
        if !tasks.get(dedup_key).is_some_and(|task| task.id == id) {
            return Ok(false);
        }
        tasks.remove(dedup_key);
        self.file.save(&tasks).await?;
        Ok(true)
    }

    async fn replace_if_current(&self, task: &Task) -> Result<bool, StoreError> {
        let _guard = self.file.guard.lock().await;
        let mut tasks: TaskMap = self.file.load().await?;
        match tasks.get_mut(&task.dedup_key) {
            Some(existing) if existing.id == task.id => *existing = task.clone(),
            _ => return Ok(false),
        }
        self.file.save(&tasks).await?;
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<Task>, StoreError> {
        let tasks: TaskMap = self.file.load().await?;
        Ok(tasks.into_values().collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.file.guard.lock().await;
        let tasks: TaskMap = self.file.load().await?;
        self.file.save(&TaskMap::new()).await?;
        Ok(tasks.len())
    }
}

pub struct FileLeaseStore {
    file: JsonFile,
}

#[async_trait]
impl LeaseStore for FileLeaseStore {
    async fn try_acquire(
        &self,
        now: OffsetDateTime,
        timeout: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        let _guard = self.file.guard.lock().await;
        let held: Option<Lease> = self.file.load().await?;
        if held.is_some_and(|lease| !lease.is_expired(now, timeout)) {
            return Ok(None);
        }
        let lease = Lease::new(now);
        self.file.save(&Some(&lease)).await?;
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        let _guard = self.file.guard.lock().await;
        let held: Option<Lease> = self.file.load().await?;
        if held.is_some_and(|current| current.token == lease.token) {
            self.file.delete().await?;
        }
        Ok(())
    }

    async fn current(&self) -> Result<Option<Lease>, StoreError> {
        self.file.load().await
    }

    async fn force_clear(&self) -> Result<(), StoreError> {
        let _guard = self.file.guard.lock().await;
        self.file.delete().await
    }
}

pub struct FileLogStore {
    file: JsonFile,
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn prepend(&self, entry: LogEntry, capacity: usize) -> Result<(), StoreError> {
        let _guard = self.file.guard.lock().await;
        let mut entries: Vec<LogEntry> = self.file.load().await?;
        entries.insert(0, entry);
        entries.truncate(capacity);
        self.file.save(&entries).await
    }

    async fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.file.load().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.file.guard.lock().await;
        self.file.delete().await
    }
}
