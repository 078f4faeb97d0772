//! Ring-buffered build log and the aggregate stats derived from it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::application::repos::{LogStore, StoreError};
use crate::domain::log::{LogEntry, LogKind, LogStatus};

/// Default number of entries kept before the oldest are evicted.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Aggregates over the retained log window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub last_build: Option<LogEntry>,
    pub last_success: Option<LogEntry>,
    pub last_error: Option<LogEntry>,
    pub latest_by_kind: BTreeMap<LogKind, LogEntry>,
}

pub struct BuildLog {
    store: Arc<dyn LogStore>,
    capacity: usize,
}

impl BuildLog {
    pub fn new(store: Arc<dyn LogStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    /// Append an entry. Failures are reported through tracing only so that a broken log
    /// never fails the build it describes.
    pub async fn record(&self, entry: LogEntry) {
        if let Err(err) = self.store.prepend(entry, self.capacity).await {
            warn!(
                target = "restatic::build_log",
                op = "record",
                error = %err,
                "Failed to persist build log entry"
            );
        }
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let mut entries = self.store.entries().await?;
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> Result<BuildStats, StoreError> {
        let entries = self.store.entries().await?;
        Ok(summarize(&entries))
    }
}

/// Single scan from the head; the first match of each kind is the most recent one.
///
/// `total` and `last_build` cover every entry, `started` markers included.
pub fn summarize(entries: &[LogEntry]) -> BuildStats {
    let mut stats = BuildStats::default();
    for entry in entries {
        match entry.status {
            LogStatus::Started => {}
            LogStatus::Success => {
                stats.successful += 1;
                if stats.last_success.is_none() {
                    stats.last_success = Some(entry.clone());
                }
            }
            LogStatus::Error => {
                stats.failed += 1;
                if stats.last_error.is_none() {
                    stats.last_error = Some(entry.clone());
                }
            }
        }
        if stats.last_build.is_none() {
            stats.last_build = Some(entry.clone());
        }
        stats
            .latest_by_kind
            .entry(entry.kind)
            .or_insert_with(|| entry.clone());
        stats.total += 1;
    }
    stats
}
