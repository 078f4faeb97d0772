//! Build tasks: the unit of scheduled work.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

/// Default priority for a whole-archive rebuild.
pub const ARCHIVE_SET_PRIORITY: i32 = 20;
/// Default priority for a full-site rebuild.
pub const FULL_REBUILD_PRIORITY: i32 = 30;
/// Priority used for categories missing from the priority table.
pub const DEFAULT_SINGLE_PRIORITY: i32 = 10;

/// Content category of a single build target (`product`, `page`, `post`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetCategory(String);

impl TargetCategory {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// One page identified by an opaque target id.
    Single {
        target_id: String,
        category: TargetCategory,
        url: Url,
    },
    /// Home page plus every listing/archive page supplied by the site catalog.
    ArchiveSet,
    /// Every eligible target followed by the archive set.
    FullRebuild,
}

impl TaskKind {
    pub fn single(target_id: impl Into<String>, category: TargetCategory, url: Url) -> Self {
        Self::Single {
            target_id: target_id.into(),
            category,
            url,
        }
    }

    /// Key under which at most one live task may exist.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Single { target_id, .. } => format!("single:{target_id}"),
            Self::ArchiveSet => "archives".to_string(),
            Self::FullRebuild => "full".to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Single { .. } => "single",
            Self::ArchiveSet => "archive_set",
            Self::FullRebuild => "full_rebuild",
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Single { url, .. } => Some(url),
            Self::ArchiveSet | Self::FullRebuild => None,
        }
    }

    pub fn category(&self) -> Option<&TargetCategory> {
        match self {
            Self::Single { category, .. } => Some(category),
            Self::ArchiveSet | Self::FullRebuild => None,
        }
    }
}

/// How an upsert treats the attempt history of a task it overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertMode {
    /// Start over: attempts, last error and retry time are cleared.
    #[default]
    Reset,
    /// Keep `attempts` and `last_error` from the task being replaced.
    PreserveAttempts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identity of this enqueue; a re-enqueue under the same key gets a new id.
    pub id: Uuid,
    pub kind: TaskKind,
    pub dedup_key: String,
    pub priority: i32,
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub retry_after: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
}

impl Task {
    pub fn new(kind: TaskKind, priority: i32, added_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            dedup_key: kind.dedup_key(),
            kind,
            priority,
            attempts: 0,
            last_error: None,
            retry_after: None,
            added_at,
        }
    }

    /// Whether the task may be picked up at `now`.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.retry_after.is_none_or(|at| at <= now)
    }

    pub fn is_failing(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn url(&self) -> Option<&Url> {
        self.kind.url()
    }

    /// Resolve the task to store when `self` overwrites `previous`.
    pub fn merged_over(mut self, previous: Option<&Task>, mode: UpsertMode) -> Self {
        match (mode, previous) {
            (UpsertMode::PreserveAttempts, Some(previous)) => {
                self.attempts = previous.attempts;
                self.last_error = previous.last_error.clone();
            }
            _ => {
                self.attempts = 0;
                self.last_error = None;
            }
        }
        self.retry_after = None;
        self
    }
}

/// Batch ordering: lowest priority number first, then oldest.
pub fn schedule_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.added_at.cmp(&b.added_at))
        .then_with(|| a.dedup_key.cmp(&b.dedup_key))
}

/// Default priority per target category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    by_category: BTreeMap<TargetCategory, i32>,
    fallback: i32,
}

impl PriorityTable {
    pub fn new(by_category: BTreeMap<TargetCategory, i32>, fallback: i32) -> Self {
        Self {
            by_category,
            fallback,
        }
    }

    pub fn with_priority(mut self, category: TargetCategory, priority: i32) -> Self {
        self.by_category.insert(category, priority);
        self
    }

    pub fn with_fallback(mut self, fallback: i32) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn for_category(&self, category: &TargetCategory) -> i32 {
        self.by_category
            .get(category)
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn for_kind(&self, kind: &TaskKind) -> i32 {
        match kind {
            TaskKind::Single { category, .. } => self.for_category(category),
            TaskKind::ArchiveSet => ARCHIVE_SET_PRIORITY,
            TaskKind::FullRebuild => FULL_REBUILD_PRIORITY,
        }
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        let by_category = [("product", 1), ("page", 5), ("post", 10), ("attachment", 15)]
            .into_iter()
            .map(|(name, priority)| (TargetCategory::new(name), priority))
            .collect();
        Self::new(by_category, DEFAULT_SINGLE_PRIORITY)
    }
}
