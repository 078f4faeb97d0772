use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::catalog::SiteCatalog;
use super::error::BuildError;
use super::inject::inject_build_metadata;
use super::late_loading::{has_late_loading_content, second_pass_is_better};
use super::optimize::{OptimizeOptions, optimize_html};
use super::source::{ContentSource, with_query_marker};
use crate::application::build_log::BuildLog;
use crate::application::clock::Clock;
use crate::application::notify::Notifier;
use crate::cache::CacheStore;
use crate::domain::log::{LogEntry, LogKind, LogStatus};
use crate::domain::task::{Task, TaskKind};

const BYPASS_VALUE: &str = "miss";

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// When false, queued builds complete without fetching or writing anything.
    pub enabled: bool,
    /// Query key telling the content source to render fresh.
    pub bypass_param: String,
    /// Delay before re-rendering pages that look like they load content late.
    pub second_pass: Option<Duration>,
    /// Minification and resource hints, run before the build metadata is stamped in.
    pub optimize: Option<OptimizeOptions>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            bypass_param: "restatic".to_string(),
            second_pass: None,
            optimize: None,
        }
    }
}

/// A page committed to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBuild {
    pub url: Url,
    pub path: PathBuf,
    pub bytes: usize,
    pub second_pass: bool,
    pub optimized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub url: Url,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub built: Vec<PageBuild>,
    pub failed: Vec<PageFailure>,
}

impl BuildOutcome {
    fn single(page: PageBuild) -> Self {
        Self {
            built: vec![page],
            failed: Vec::new(),
        }
    }

    fn merge(&mut self, other: BuildOutcome) {
        self.built.extend(other.built);
        self.failed.extend(other.failed);
    }

    /// A set build fails only when nothing at all could be built.
    fn into_result(self) -> Result<Self, BuildError> {
        match self.failed.first() {
            Some(first) if self.built.is_empty() => Err(BuildError::SetFailed {
                failed: self.failed.len(),
                first: first.error.clone(),
            }),
            _ => Ok(self),
        }
    }
}

/// Renders targets through the content source and writes them into the cache.
pub struct Builder {
    source: Arc<dyn ContentSource>,
    cache: Arc<CacheStore>,
    catalog: Arc<dyn SiteCatalog>,
    log: Arc<BuildLog>,
    notifier: Option<Arc<Notifier>>,
    clock: Arc<dyn Clock>,
    options: BuildOptions,
}

impl Builder {
    pub fn new(
        source: Arc<dyn ContentSource>,
        cache: Arc<CacheStore>,
        catalog: Arc<dyn SiteCatalog>,
        log: Arc<BuildLog>,
        clock: Arc<dyn Clock>,
        options: BuildOptions,
    ) -> Self {
        Self {
            source,
            cache,
            catalog,
            log,
            notifier: None,
            clock,
            options,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[instrument(skip(self, task), fields(dedup_key = %task.dedup_key, kind = task.kind.label()))]
    pub async fn build_task(&self, task: &Task) -> Result<BuildOutcome, BuildError> {
        if !self.options.enabled {
            debug!(
                target = "restatic::build",
                op = "build_task",
                result = "disabled",
                "Static builds disabled; completing task without output"
            );
            return Ok(BuildOutcome::default());
        }

        let started = Instant::now();
        let result = match &task.kind {
            TaskKind::Single { url, .. } => self
                .build_page(url, LogKind::Single)
                .await
                .map(BuildOutcome::single),
            TaskKind::ArchiveSet => self.build_archive_set().await,
            TaskKind::FullRebuild => self.build_full_rebuild().await,
        };

        let kind = task.kind.label();
        histogram!("restatic_build_ms", "kind" => kind)
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!(
            "restatic_build_total",
            "kind" => kind,
            "result" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);

        if let (Ok(outcome), Some(notifier)) = (&result, &self.notifier)
            && !outcome.built.is_empty()
        {
            notifier.notify(task.kind.url());
        }
        result
    }

    /// Fetch, post-process and commit a single URL.
    pub async fn build_page(&self, url: &Url, kind: LogKind) -> Result<PageBuild, BuildError> {
        let started = Instant::now();
        let result = self.render_and_write(url).await;

        let entry = match &result {
            Ok(page) => {
                info!(
                    target = "restatic::build",
                    op = "build_page",
                    url = %url,
                    path = %page.path.display(),
                    bytes = page.bytes,
                    second_pass = page.second_pass,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Static page built"
                );
                LogEntry::new(
                    self.clock.now(),
                    kind,
                    LogStatus::Success,
                    format!("Built {url}"),
                )
                .with_meta("bytes", page.bytes)
                .with_meta("path", page.path.display().to_string())
                .with_meta("elapsed_ms", started.elapsed().as_millis() as u64)
                .with_meta("second_pass", page.second_pass)
                .with_meta("optimized", page.optimized)
            }
            Err(err) => {
                warn!(
                    target = "restatic::build",
                    op = "build_page",
                    url = %url,
                    error = %err,
                    error_kind = err.kind(),
                    "Static page build failed"
                );
                let entry = LogEntry::new(self.clock.now(), kind, LogStatus::Error, err.to_string())
                    .with_meta("error_kind", err.kind());
                match err {
                    BuildError::FetchFailed {
                        status: Some(status),
                        ..
                    } => entry.with_meta("http_status", *status),
                    _ => entry,
                }
            }
        };
        self.log.record(entry.with_url(url.as_str())).await;

        result
    }

    async fn render_and_write(&self, url: &Url) -> Result<PageBuild, BuildError> {
        let fetch_url = with_query_marker(url, &self.options.bypass_param, BYPASS_VALUE);
        let mut body = self.fetch_html(url, &fetch_url).await?;

        let mut second_pass = false;
        if let Some(delay) = self.options.second_pass
            && has_late_loading_content(&body)
        {
            if let Some(settled) = self.settle_late_content(url, &body, delay).await {
                body = settled;
                second_pass = true;
            }
        }

        let optimized = self.options.optimize.is_some();
        if let Some(optimize) = &self.options.optimize {
            body = optimize_html(&body, url, optimize).html;
        }

        let html = inject_build_metadata(&body, url, self.clock.now());
        let path = self.cache.path_for(url);
        self.cache
            .write(&path, &html)
            .map_err(|source| BuildError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        Ok(PageBuild {
            url: url.clone(),
            path,
            bytes: html.len(),
            second_pass,
            optimized,
        })
    }

    async fn fetch_html(&self, url: &Url, fetch_url: &Url) -> Result<String, BuildError> {
        let response = self
            .source
            .fetch(fetch_url)
            .await
            .map_err(|err| BuildError::fetch(url.as_str(), None, err.to_string()))?;

        if response.status != 200 {
            return Err(BuildError::fetch(
                url.as_str(),
                Some(response.status),
                format!("HTTP {}", response.status),
            ));
        }
        if response.body.trim().is_empty() {
            return Err(BuildError::fetch(
                url.as_str(),
                Some(response.status),
                "empty response body",
            ));
        }
        Ok(response.body)
    }

    /// Best effort: wait, render again and keep the second body only if it differs enough.
    async fn settle_late_content(&self, url: &Url, first: &str, delay: Duration) -> Option<String> {
        tokio::time::sleep(delay).await;

        let late_key = format!("{}_late", self.options.bypass_param);
        let retry_url = with_query_marker(
            &with_query_marker(url, &self.options.bypass_param, BYPASS_VALUE),
            &late_key,
            "1",
        );

        match self.source.fetch(&retry_url).await {
            Ok(response) if response.status == 200 && second_pass_is_better(first, &response.body) => {
                debug!(
                    target = "restatic::build",
                    op = "second_pass",
                    url = %url,
                    first_bytes = first.len(),
                    second_bytes = response.body.len(),
                    "Second render captured late-loading content"
                );
                Some(response.body)
            }
            Ok(response) => {
                debug!(
                    target = "restatic::build",
                    op = "second_pass",
                    url = %url,
                    status = response.status,
                    "Second render discarded"
                );
                None
            }
            Err(err) => {
                debug!(
                    target = "restatic::build",
                    op = "second_pass",
                    url = %url,
                    error = %err,
                    "Second render failed; keeping first render"
                );
                None
            }
        }
    }

    async fn build_urls(&self, urls: Vec<Url>, kind: LogKind) -> BuildOutcome {
        let mut outcome = BuildOutcome::default();
        for url in urls {
            match self.build_page(&url, kind).await {
                Ok(page) => outcome.built.push(page),
                Err(err) => outcome.failed.push(PageFailure {
                    url,
                    error: err.to_string(),
                }),
            }
        }
        outcome
    }

    async fn build_archive_set(&self) -> Result<BuildOutcome, BuildError> {
        let urls = self.catalog.archive_urls().await?;
        self.record_started(LogKind::ArchiveSet, urls.len()).await;

        let outcome = self.build_urls(urls, LogKind::ArchiveSet).await;
        self.record_summary(LogKind::ArchiveSet, &outcome).await;
        outcome.into_result()
    }

    async fn build_full_rebuild(&self) -> Result<BuildOutcome, BuildError> {
        let targets = self.catalog.targets().await?;
        let archives = self.catalog.archive_urls().await?;
        self.record_started(LogKind::FullRebuild, targets.len() + archives.len())
            .await;

        let target_urls = targets.into_iter().map(|target| target.url).collect();
        let mut outcome = self.build_urls(target_urls, LogKind::FullRebuild).await;
        outcome.merge(self.build_urls(archives, LogKind::FullRebuild).await);

        self.record_summary(LogKind::FullRebuild, &outcome).await;
        outcome.into_result()
    }

    async fn record_started(&self, kind: LogKind, pages: usize) {
        info!(
            target = "restatic::build",
            op = "build_set",
            kind = ?kind,
            pages,
            "Set rebuild started"
        );
        let entry = LogEntry::new(
            self.clock.now(),
            kind,
            LogStatus::Started,
            format!("Rebuilding {pages} pages"),
        )
        .with_meta("pages", pages);
        self.log.record(entry).await;
    }

    async fn record_summary(&self, kind: LogKind, outcome: &BuildOutcome) {
        let status = if outcome.built.is_empty() && !outcome.failed.is_empty() {
            LogStatus::Error
        } else {
            LogStatus::Success
        };
        info!(
            target = "restatic::build",
            op = "build_set",
            kind = ?kind,
            built = outcome.built.len(),
            failed = outcome.failed.len(),
            "Set rebuild finished"
        );
        let entry = LogEntry::new(
            self.clock.now(),
            kind,
            status,
            format!(
                "Rebuilt {} pages, {} failed",
                outcome.built.len(),
                outcome.failed.len()
            ),
        )
        .with_meta("built", outcome.built.len())
        .with_meta("failed", outcome.failed.len());
        self.log.record(entry).await;
    }
}
