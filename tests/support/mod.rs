#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use restatic::application::build::{
    BuildOptions, BuildTarget, Builder, ContentSource, FetchError, FetchResponse, StaticCatalog,
};
use restatic::application::build_log::BuildLog;
use restatic::application::clock::{Clock, ManualClock};
use restatic::application::queue::{BuildQueue, QueuePolicy};
use restatic::cache::CacheStore;
use restatic::domain::task::{PriorityTable, TargetCategory};
use restatic::infra::memory::{MemoryLeaseStore, MemoryLogStore, MemoryTaskStore};
use tempfile::TempDir;
use time::macros::datetime;
use url::Url;

/// Content source answering from an in-memory table, keyed by path.
#[derive(Default)]
pub struct StubSource {
    pages: Mutex<BTreeMap<String, FetchResponse>>,
    late_pages: Mutex<BTreeMap<String, String>>,
    fetched: Mutex<Vec<Url>>,
    delay: Mutex<Option<Duration>>,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, path: &str, body: &str) {
        self.respond(path, 200, body);
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.pages.lock().expect("pages lock").insert(
            path.to_string(),
            FetchResponse {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Body served for the delayed re-render of `path`.
    pub fn late_page(&self, path: &str, body: &str) {
        self.late_pages
            .lock()
            .expect("late pages lock")
            .insert(path.to_string(), body.to_string());
    }

    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn fetched_paths(&self) -> Vec<String> {
        self.fetched
            .lock()
            .expect("fetched lock")
            .iter()
            .map(|url| url.path().to_string())
            .collect()
    }

    pub fn fetched_urls(&self) -> Vec<Url> {
        self.fetched.lock().expect("fetched lock").clone()
    }
}

#[async_trait]
impl ContentSource for StubSource {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        self.fetched.lock().expect("fetched lock").push(url.clone());
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let is_late = url.query_pairs().any(|(key, _)| key.ends_with("_late"));
        if is_late
            && let Some(body) = self.late_pages.lock().expect("late pages lock").get(url.path())
        {
            return Ok(FetchResponse {
                status: 200,
                body: body.clone(),
            });
        }
        let response = self.pages.lock().expect("pages lock").get(url.path()).cloned();
        Ok(response.unwrap_or(FetchResponse {
            status: 404,
            body: String::new(),
        }))
    }
}

pub fn url(path: &str) -> Url {
    Url::parse("https://shop.example.com/")
        .expect("base url")
        .join(path)
        .expect("joined url")
}

pub fn target(id: &str, category: &str, path: &str) -> BuildTarget {
    BuildTarget {
        id: id.to_string(),
        category: TargetCategory::new(category),
        url: url(path),
    }
}

pub fn html(title: &str) -> String {
    format!("<html><head><title>{title}</title></head><body><h1>{title}</h1></body></html>")
}

/// Fully wired in-memory queue over a stub source and a temporary cache root.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub source: Arc<StubSource>,
    pub cache: Arc<CacheStore>,
    pub log: Arc<BuildLog>,
    pub builder: Arc<Builder>,
    pub queue: Arc<BuildQueue>,
    pub catalog: Arc<StaticCatalog>,
}

impl Harness {
    pub fn new(catalog: StaticCatalog) -> Self {
        Self::with_policy(catalog, QueuePolicy::default())
    }

    pub fn with_policy(catalog: StaticCatalog, policy: QueuePolicy) -> Self {
        Self::build(catalog, policy, BuildOptions::default())
    }

    pub fn with_options(catalog: StaticCatalog, options: BuildOptions) -> Self {
        Self::build(catalog, QueuePolicy::default(), options)
    }

    fn build(catalog: StaticCatalog, policy: QueuePolicy, options: BuildOptions) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(datetime!(2026-03-01 12:00 UTC)));
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let source = StubSource::new();
        let cache = Arc::new(CacheStore::new(dir.path(), Arc::clone(&shared_clock)));
        let log = Arc::new(BuildLog::new(Arc::new(MemoryLogStore::new()), 100));
        let catalog = Arc::new(catalog);
        let builder = Arc::new(Builder::new(
            source.clone(),
            Arc::clone(&cache),
            catalog.clone(),
            Arc::clone(&log),
            Arc::clone(&shared_clock),
            options,
        ));
        let queue = Arc::new(BuildQueue::new(
            Arc::new(MemoryTaskStore::new()),
            Arc::new(MemoryLeaseStore::new()),
            Arc::clone(&builder),
            Arc::clone(&log),
            shared_clock,
            PriorityTable::default(),
            policy,
        ));

        Self {
            dir,
            clock,
            source,
            cache,
            log,
            builder,
            queue,
            catalog,
        }
    }
}
