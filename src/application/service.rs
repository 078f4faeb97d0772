//! Administrative surface over the queue, cache and build log.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::Url;

use crate::application::build::{Builder, PageBuild, SiteCatalog};
use crate::application::build_log::{BuildLog, BuildStats};
use crate::application::error::AppError;
use crate::application::notify::{Notifier, NotifyError};
use crate::application::queue::{BatchReport, BuildQueue, QueueStatus};
use crate::cache::{CacheLookup, CacheStore};
use crate::domain::log::{LogEntry, LogKind};
use crate::domain::task::{TargetCategory, Task, TaskKind};

pub struct StaticBuildService {
    queue: Arc<BuildQueue>,
    builder: Arc<Builder>,
    cache: Arc<CacheStore>,
    log: Arc<BuildLog>,
    catalog: Arc<dyn SiteCatalog>,
    notifier: Option<Arc<Notifier>>,
    ttl: Duration,
    auto_schedule: bool,
}

impl StaticBuildService {
    pub fn new(
        queue: Arc<BuildQueue>,
        builder: Arc<Builder>,
        cache: Arc<CacheStore>,
        log: Arc<BuildLog>,
        catalog: Arc<dyn SiteCatalog>,
    ) -> Self {
        Self {
            queue,
            builder,
            cache,
            log,
            catalog,
            notifier: None,
            ttl: Duration::ZERO,
            auto_schedule: true,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Cache TTL used by [`Self::lookup`]; zero disables staleness.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether enqueues arm the in-process batch timer. One-shot processes turn this off.
    pub fn with_auto_schedule(mut self, enabled: bool) -> Self {
        self.auto_schedule = enabled;
        self
    }

    pub fn queue(&self) -> &Arc<BuildQueue> {
        &self.queue
    }

    pub async fn enqueue_single(
        &self,
        target_id: &str,
        category: TargetCategory,
        url: Url,
        priority: Option<i32>,
    ) -> Result<Task, AppError> {
        let target_id = target_id.trim();
        if target_id.is_empty() {
            return Err(AppError::validation("target id must not be empty"));
        }
        ensure_http(&url)?;
        self.enqueue(TaskKind::single(target_id, category, url), priority)
            .await
    }

    pub async fn enqueue_archive_set(&self, priority: Option<i32>) -> Result<Task, AppError> {
        self.enqueue(TaskKind::ArchiveSet, priority).await
    }

    pub async fn enqueue_full_rebuild(&self, priority: Option<i32>) -> Result<Task, AppError> {
        self.enqueue(TaskKind::FullRebuild, priority).await
    }

    /// Enqueue every catalog target of `category`.
    pub async fn enqueue_category(
        &self,
        category: &TargetCategory,
        priority: Option<i32>,
    ) -> Result<usize, AppError> {
        let targets = self.catalog.targets().await?;
        let mut enqueued = 0;
        for target in targets.into_iter().filter(|t| &t.category == category) {
            self.queue
                .enqueue(
                    TaskKind::single(target.id, target.category, target.url),
                    priority,
                )
                .await?;
            enqueued += 1;
        }
        if enqueued > 0 {
            self.arm_timer();
        }

        info!(
            target = "restatic::service",
            op = "enqueue_category",
            category = %category,
            enqueued,
            "Category enqueued"
        );
        Ok(enqueued)
    }

    async fn enqueue(&self, kind: TaskKind, priority: Option<i32>) -> Result<Task, AppError> {
        let task = self.queue.enqueue(kind, priority).await?;
        self.arm_timer();
        Ok(task)
    }

    fn arm_timer(&self) {
        if self.auto_schedule {
            self.queue.schedule(self.queue.policy().enqueue_delay);
        }
    }

    pub async fn clear_queue(&self) -> Result<usize, AppError> {
        Ok(self.queue.clear().await?)
    }

    pub async fn status(&self) -> Result<QueueStatus, AppError> {
        Ok(self.queue.status().await?)
    }

    pub async fn retry_failures(&self, category: &TargetCategory) -> Result<usize, AppError> {
        let retried = self.queue.retry_failures(category).await?;
        if retried > 0 {
            self.arm_timer();
        }
        Ok(retried)
    }

    pub async fn clear_failures(&self, category: &TargetCategory) -> Result<usize, AppError> {
        Ok(self.queue.clear_failures(category).await?)
    }

    /// Run a batch now, arming a follow-up when auto scheduling is on.
    pub async fn process_now(&self) -> Result<BatchReport, AppError> {
        let report = if self.auto_schedule {
            self.queue.process_batch().await?
        } else {
            self.queue.run_batch().await?
        };
        Ok(report)
    }

    /// Build one URL immediately, outside the queue, and signal the webhook on success.
    pub async fn build_now(&self, url: &Url) -> Result<PageBuild, AppError> {
        ensure_http(url)?;
        let page = self.builder.build_page(url, LogKind::Single).await?;
        if let Some(notifier) = self.notifier.as_ref() {
            notifier.notify(Some(url));
        }
        Ok(page)
    }

    pub async fn purge(&self, url: &Url) -> Result<bool, AppError> {
        Ok(self.cache.purge(url)?)
    }

    pub fn lookup(&self, url: &Url) -> CacheLookup {
        self.cache.lookup(url, self.ttl)
    }

    pub async fn log(&self, limit: usize) -> Result<Vec<LogEntry>, AppError> {
        Ok(self.log.recent(limit).await?)
    }

    pub async fn clear_log(&self) -> Result<(), AppError> {
        Ok(self.log.clear().await?)
    }

    pub async fn stats(&self) -> Result<BuildStats, AppError> {
        Ok(self.log.stats().await?)
    }

    pub async fn ping_webhook(&self) -> Result<(), AppError> {
        let notifier = self.notifier.as_ref().ok_or(NotifyError::NotConfigured)?;
        Ok(notifier.ping().await?)
    }
}

fn ensure_http(url: &Url) -> Result<(), AppError> {
    if matches!(url.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "url `{url}` must use http or https"
        )))
    }
}
