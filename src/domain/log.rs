//! Build log entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::task::TaskKind;

/// What produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Single,
    ArchiveSet,
    FullRebuild,
    Webhook,
}

impl From<&TaskKind> for LogKind {
    fn from(kind: &TaskKind) -> Self {
        match kind {
            TaskKind::Single { .. } => Self::Single,
            TaskKind::ArchiveSet => Self::ArchiveSet,
            TaskKind::FullRebuild => Self::FullRebuild,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Started,
    Success,
    Error,
}

/// Immutable record of one build event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub kind: LogKind,
    pub url: Option<String>,
    pub status: LogStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl LogEntry {
    pub fn new(
        timestamp: OffsetDateTime,
        kind: LogKind,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind,
            url: None,
            status,
            message: message.into(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}
