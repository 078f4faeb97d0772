//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CategoryArgs, CliArgs, Command, EnqueueArgs, GlobalOverrides, LogArgs, PriorityArgs, UrlArgs,
};

use crate::application::build::{BuildOptions, BuildTarget, OptimizeOptions, StaticCatalog};
use crate::application::build_log::DEFAULT_LOG_CAPACITY;
use crate::application::notify::NotifyMode;
use crate::application::queue::QueuePolicy;
use crate::domain::task::{DEFAULT_SINGLE_PRIORITY, PriorityTable, TargetCategory};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "restatic";
const ENV_PREFIX: &str = "RESTATIC";
const DEFAULT_CACHE_ROOT: &str = "static-cache";
const DEFAULT_STATE_DIR: &str = ".restatic";
const DEFAULT_BYPASS_PARAM: &str = "restatic";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SECOND_PASS_DELAY_MS: u64 = 3_000;
const DEFAULT_MAX_BATCH_SIZE: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_SECS: [u64; 3] = [30, 120, 300];
const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_FOLLOW_UP_DELAY_SECS: u64 = 5;
const DEFAULT_ENQUEUE_DELAY_SECS: u64 = 2;
const DEFAULT_TICK_SECS: u64 = 30;
const DEFAULT_ARCHIVE_INTERVAL_SECS: u64 = 3_600;
const DEFAULT_WEBHOOK_DEBOUNCE_SECS: u64 = 60;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 8;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub builder: BuilderSettings,
    pub queue: QueueSettings,
    pub webhook: WebhookSettings,
    pub site: SiteSettings,
    pub log: BuildLogSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    File,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub cache_root: PathBuf,
    pub state_dir: PathBuf,
    pub backend: StateBackend,
    /// Zero means cached pages never go stale.
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub enabled: bool,
    pub bypass_param: String,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub second_pass: bool,
    pub second_pass_delay: Duration,
    /// `None` leaves fetched markup as rendered.
    pub optimize: Option<OptimizeOptions>,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_batch_size: NonZeroUsize,
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
    pub lease_timeout: Duration,
    pub follow_up_delay: Duration,
    pub enqueue_delay: Duration,
    pub tick: Duration,
    /// Zero disables the periodic archive rebuild.
    pub archive_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookMode {
    Off,
    Immediate,
    Debounced,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: Option<Url>,
    pub mode: WebhookMode,
    pub debounce: Duration,
    pub timeout: Duration,
    pub install_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub home_url: Option<Url>,
    pub archives: Vec<Url>,
    pub targets: Vec<BuildTarget>,
    pub priorities: PriorityTable,
}

#[derive(Debug, Clone)]
pub struct BuildLogSettings {
    pub capacity: NonZeroUsize,
}

impl BuilderSettings {
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            enabled: self.enabled,
            bypass_param: self.bypass_param.clone(),
            second_pass: self.second_pass.then_some(self.second_pass_delay),
            optimize: self.optimize,
        }
    }
}

impl QueueSettings {
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_batch_size: self.max_batch_size.get(),
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
            lease_timeout: self.lease_timeout,
            follow_up_delay: self.follow_up_delay,
            enqueue_delay: self.enqueue_delay,
        }
    }
}

impl WebhookSettings {
    pub fn notify_mode(&self) -> NotifyMode {
        match self.mode {
            WebhookMode::Off => NotifyMode::Off,
            WebhookMode::Immediate => NotifyMode::Immediate,
            WebhookMode::Debounced => NotifyMode::Debounced(self.debounce),
        }
    }
}

impl SiteSettings {
    pub fn catalog(&self) -> StaticCatalog {
        StaticCatalog::new(
            self.home_url.clone(),
            self.archives.clone(),
            self.targets.clone(),
        )
    }

    /// Value sent as `site` in webhook payloads.
    pub fn label(&self) -> String {
        self.home_url
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration from the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    builder: RawBuilderSettings,
    queue: RawQueueSettings,
    webhook: RawWebhookSettings,
    site: RawSiteSettings,
    log: RawBuildLogSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.cache_root.as_ref() {
            self.store.cache_root = Some(root.clone());
        }
        if let Some(dir) = overrides.state_dir.as_ref() {
            self.store.state_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            store,
            builder,
            queue,
            webhook,
            site,
            log,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            builder: build_builder_settings(builder)?,
            queue: build_queue_settings(queue)?,
            webhook: build_webhook_settings(webhook)?,
            site: build_site_settings(site)?,
            log: build_log_settings(log)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let cache_root = store
        .cache_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if cache_root.as_os_str().is_empty() {
        return Err(LoadError::invalid("store.cache_root", "path must not be empty"));
    }

    let state_dir = store
        .state_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    if state_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("store.state_dir", "path must not be empty"));
    }

    let backend = match store.backend.as_deref().map(str::trim) {
        None | Some("file") => StateBackend::File,
        Some("memory") => StateBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "store.backend",
                format!("unknown backend `{other}` (expected file or memory)"),
            ));
        }
    };

    Ok(StoreSettings {
        cache_root,
        state_dir,
        backend,
        ttl: Duration::from_secs(store.ttl_seconds.unwrap_or(0)),
    })
}

fn build_builder_settings(builder: RawBuilderSettings) -> Result<BuilderSettings, LoadError> {
    let bypass_param = builder
        .bypass_param
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_BYPASS_PARAM.to_string());
    if bypass_param.is_empty()
        || !bypass_param
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(LoadError::invalid(
            "builder.bypass_param",
            "must be a non-empty query key of letters, digits, `_` or `-`",
        ));
    }

    let fetch_timeout = positive_secs(
        builder
            .fetch_timeout_seconds
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        "builder.fetch_timeout_seconds",
    )?;

    let user_agent = builder
        .user_agent
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("restatic/{}", env!("CARGO_PKG_VERSION")));

    Ok(BuilderSettings {
        enabled: builder.enabled.unwrap_or(true),
        bypass_param,
        fetch_timeout,
        user_agent,
        second_pass: builder.second_pass.unwrap_or(false),
        second_pass_delay: Duration::from_millis(
            builder
                .second_pass_delay_ms
                .unwrap_or(DEFAULT_SECOND_PASS_DELAY_MS),
        ),
        optimize: builder.optimize.unwrap_or(false).then(|| OptimizeOptions {
            minify_html: builder.minify_html.unwrap_or(true),
            resource_hints: builder.resource_hints.unwrap_or(true),
        }),
    })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let max_batch_size = queue.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE);
    let max_batch_size = usize::try_from(max_batch_size)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("queue.max_batch_size", "must be greater than zero"))?;

    let backoff_secs = queue
        .backoff_seconds
        .unwrap_or_else(|| DEFAULT_BACKOFF_SECS.to_vec());
    if backoff_secs.is_empty() {
        return Err(LoadError::invalid(
            "queue.backoff_seconds",
            "at least one delay is required",
        ));
    }

    Ok(QueueSettings {
        max_batch_size,
        max_retries: queue.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        backoff: backoff_secs.into_iter().map(Duration::from_secs).collect(),
        lease_timeout: positive_secs(
            queue
                .lease_timeout_seconds
                .unwrap_or(DEFAULT_LEASE_TIMEOUT_SECS),
            "queue.lease_timeout_seconds",
        )?,
        follow_up_delay: Duration::from_secs(
            queue
                .follow_up_delay_seconds
                .unwrap_or(DEFAULT_FOLLOW_UP_DELAY_SECS),
        ),
        enqueue_delay: Duration::from_secs(
            queue
                .enqueue_delay_seconds
                .unwrap_or(DEFAULT_ENQUEUE_DELAY_SECS),
        ),
        tick: positive_secs(
            queue.tick_seconds.unwrap_or(DEFAULT_TICK_SECS),
            "queue.tick_seconds",
        )?,
        archive_interval: Duration::from_secs(
            queue
                .archive_interval_seconds
                .unwrap_or(DEFAULT_ARCHIVE_INTERVAL_SECS),
        ),
    })
}

fn build_webhook_settings(webhook: RawWebhookSettings) -> Result<WebhookSettings, LoadError> {
    let url = match webhook.url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(parse_http_url(value, "webhook.url")?),
    };

    let mode = match webhook.mode.as_deref().map(str::trim) {
        None | Some("debounced") => WebhookMode::Debounced,
        Some("immediate") => WebhookMode::Immediate,
        Some("off") => WebhookMode::Off,
        Some(other) => {
            return Err(LoadError::invalid(
                "webhook.mode",
                format!("unknown mode `{other}` (expected off, immediate or debounced)"),
            ));
        }
    };

    let debounce = Duration::from_secs(
        webhook
            .debounce_seconds
            .unwrap_or(DEFAULT_WEBHOOK_DEBOUNCE_SECS)
            .max(1),
    );
    let timeout = positive_secs(
        webhook
            .timeout_seconds
            .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        "webhook.timeout_seconds",
    )?;

    let install_id = webhook
        .install_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    Ok(WebhookSettings {
        url,
        mode,
        debounce,
        timeout,
        install_id,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let home_url = match site.home_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(parse_http_url(value, "site.home_url")?),
    };

    let archives = site
        .archives
        .iter()
        .map(|value| parse_http_url(value, "site.archives"))
        .collect::<Result<Vec<_>, _>>()?;

    let targets = site
        .targets
        .into_iter()
        .map(|target| {
            let id = target.id.trim().to_string();
            if id.is_empty() {
                return Err(LoadError::invalid("site.targets", "target id must not be empty"));
            }
            Ok(BuildTarget {
                id,
                category: TargetCategory::new(target.category),
                url: parse_http_url(&target.url, "site.targets")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let priorities = site.category_priorities.into_iter().fold(
        PriorityTable::default().with_fallback(
            site.default_priority.unwrap_or(DEFAULT_SINGLE_PRIORITY),
        ),
        |table, (name, priority)| table.with_priority(TargetCategory::new(name), priority),
    );

    Ok(SiteSettings {
        home_url,
        archives,
        targets,
        priorities,
    })
}

fn build_log_settings(log: RawBuildLogSettings) -> Result<BuildLogSettings, LoadError> {
    let capacity = log.capacity.unwrap_or(DEFAULT_LOG_CAPACITY as u64);
    let capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("log.capacity", "must be greater than zero"))?;
    Ok(BuildLogSettings { capacity })
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            key,
            format!("url `{value}` must use http or https"),
        ));
    }
    Ok(url)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    cache_root: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    backend: Option<String>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuilderSettings {
    enabled: Option<bool>,
    bypass_param: Option<String>,
    fetch_timeout_seconds: Option<u64>,
    user_agent: Option<String>,
    second_pass: Option<bool>,
    second_pass_delay_ms: Option<u64>,
    optimize: Option<bool>,
    minify_html: Option<bool>,
    resource_hints: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    max_batch_size: Option<u64>,
    max_retries: Option<u32>,
    backoff_seconds: Option<Vec<u64>>,
    lease_timeout_seconds: Option<u64>,
    follow_up_delay_seconds: Option<u64>,
    enqueue_delay_seconds: Option<u64>,
    tick_seconds: Option<u64>,
    archive_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebhookSettings {
    url: Option<String>,
    mode: Option<String>,
    debounce_seconds: Option<u64>,
    timeout_seconds: Option<u64>,
    install_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    home_url: Option<String>,
    archives: Vec<String>,
    targets: Vec<RawTarget>,
    category_priorities: BTreeMap<String, i32>,
    default_priority: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTarget {
    id: String,
    category: String,
    url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuildLogSettings {
    capacity: Option<u64>,
}

#[cfg(test)]
mod tests;
