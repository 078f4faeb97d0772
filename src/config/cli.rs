use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use url::Url;

/// Command-line arguments for the restatic binary.
#[derive(Debug, Parser)]
#[command(
    name = "restatic",
    version,
    about = "Incremental static regeneration build queue"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RESTATIC_CONFIG_FILE", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the batch timer and the periodic archive rebuild until interrupted.
    Serve,
    /// Run one batch now.
    Process,
    /// Print queue status as JSON.
    Status,
    /// Queue one page for rebuilding.
    Enqueue(EnqueueArgs),
    /// Queue a rebuild of the home page and every archive page.
    #[command(name = "enqueue-archives")]
    EnqueueArchives(PriorityArgs),
    /// Queue a rebuild of every eligible page followed by the archives.
    #[command(name = "enqueue-full")]
    EnqueueFull(PriorityArgs),
    /// Queue every catalog target in one category.
    #[command(name = "enqueue-category")]
    EnqueueCategory(CategoryArgs),
    /// Build one URL immediately, bypassing the queue.
    Build(UrlArgs),
    /// Delete the cached copy of a URL.
    Purge(UrlArgs),
    /// Print recent build log entries and stats as JSON.
    Log(LogArgs),
    /// Empty the build log.
    #[command(name = "clear-log")]
    ClearLog,
    /// Drop every queued task.
    #[command(name = "clear-queue")]
    ClearQueue,
    /// Reset failed tasks of a category so they run again.
    #[command(name = "retry-failures")]
    RetryFailures(CategoryArgs),
    /// Drop failed tasks of a category.
    #[command(name = "clear-failures")]
    ClearFailures(CategoryArgs),
    /// Send a test.ping to the configured webhook.
    #[command(name = "ping-webhook")]
    PingWebhook,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the static cache root directory.
    #[arg(long = "cache-root", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub cache_root: Option<PathBuf>,

    /// Override the queue/log state directory.
    #[arg(long = "state-dir", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueArgs {
    /// Opaque target identifier used for deduplication.
    #[arg(long = "id", value_name = "ID")]
    pub target_id: String,

    /// Target category (product, page, post, ...).
    #[arg(long, value_name = "CATEGORY")]
    pub category: String,

    /// Override the category's default priority (lower runs first).
    #[arg(long, value_name = "PRIORITY", allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// Absolute URL of the page.
    #[arg(value_name = "URL")]
    pub url: Url,
}

#[derive(Debug, Args, Clone, Default)]
pub struct PriorityArgs {
    /// Override the default priority (lower runs first).
    #[arg(long, value_name = "PRIORITY", allow_negative_numbers = true)]
    pub priority: Option<i32>,
}

#[derive(Debug, Args, Clone)]
pub struct CategoryArgs {
    #[arg(value_name = "CATEGORY")]
    pub category: String,

    /// Priority for newly queued tasks (enqueue-category only).
    #[arg(long, value_name = "PRIORITY", allow_negative_numbers = true)]
    pub priority: Option<i32>,
}

#[derive(Debug, Args, Clone)]
pub struct UrlArgs {
    #[arg(value_name = "URL")]
    pub url: Url,
}

#[derive(Debug, Args, Clone)]
pub struct LogArgs {
    /// Number of entries to print.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
