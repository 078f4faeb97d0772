use std::collections::BTreeMap;

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::task::{Task, TaskKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub single: usize,
    pub archive_set: usize,
    pub full_rebuild: usize,
}

/// A task that has failed at least once and is still queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailingTask {
    pub dedup_key: String,
    pub kind: &'static str,
    pub url: Option<String>,
    pub attempts: u32,
    pub last_error: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub retry_after: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub processing: bool,
    pub counts_by_kind: KindCounts,
    pub counts_by_category: BTreeMap<String, usize>,
    /// Tasks whose `retry_after` is still in the future.
    pub waiting_retry: usize,
    pub failing: Vec<FailingTask>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_scheduled: Option<OffsetDateTime>,
}

impl QueueStatus {
    pub(crate) fn collect(
        tasks: &[Task],
        now: OffsetDateTime,
        processing: bool,
        next_scheduled: Option<OffsetDateTime>,
    ) -> Self {
        let mut counts_by_kind = KindCounts::default();
        let mut counts_by_category = BTreeMap::new();
        let mut waiting_retry = 0;
        let mut failing = Vec::new();

        for task in tasks {
            match &task.kind {
                TaskKind::Single { category, .. } => {
                    counts_by_kind.single += 1;
                    *counts_by_category
                        .entry(category.as_str().to_string())
                        .or_insert(0) += 1;
                }
                TaskKind::ArchiveSet => counts_by_kind.archive_set += 1,
                TaskKind::FullRebuild => counts_by_kind.full_rebuild += 1,
            }
            if !task.is_due(now) {
                waiting_retry += 1;
            }
            if let Some(error) = &task.last_error {
                failing.push(FailingTask {
                    dedup_key: task.dedup_key.clone(),
                    kind: task.kind.label(),
                    url: task.url().map(|url| url.to_string()),
                    attempts: task.attempts,
                    last_error: error.clone(),
                    retry_after: task.retry_after,
                });
            }
        }
        failing.sort_by(|a, b| a.dedup_key.cmp(&b.dedup_key));

        Self {
            total: tasks.len(),
            processing,
            counts_by_kind,
            counts_by_category,
            waiting_retry,
            failing,
            next_scheduled,
        }
    }
}
