use std::{process, sync::Arc, time::Duration};

use restatic::{
    application::{
        build::{Builder, SiteCatalog},
        build_log::BuildLog,
        clock::{Clock, SystemClock},
        error::AppError,
        notify::{Notifier, NotifierConfig},
        queue::BuildQueue,
        repos::{LeaseStore, LogStore, TaskStore},
        service::StaticBuildService,
    },
    cache::CacheStore,
    config::{self, Command, StateBackend},
    domain::task::{TargetCategory, TaskKind},
    infra::{
        error::InfraError,
        http_source::HttpContentSource,
        memory::{MemoryLeaseStore, MemoryLogStore, MemoryTaskStore},
        state_dir::StateDir,
        telemetry,
    },
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args.command.unwrap_or(Command::Serve);

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let serving = matches!(command, Command::Serve);
    let app = build_application_context(&settings, serving).await?;

    match command {
        Command::Serve => run_serve(&app, &settings).await,
        command => {
            let result = run_once(&app.service, command).await;
            if let Some(notifier) = app.notifier.as_ref()
                && let Err(err) = notifier.flush().await
            {
                warn!(
                    target = "restatic::main",
                    op = "flush_webhook",
                    error = %err,
                    "Pending webhook delivery failed"
                );
            }
            result
        }
    }
}

struct ApplicationContext {
    service: StaticBuildService,
    notifier: Option<Arc<Notifier>>,
}

async fn build_application_context(
    settings: &config::Settings,
    serving: bool,
) -> Result<ApplicationContext, AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (tasks, leases, logs, install_id) = match settings.store.backend {
        StateBackend::File => {
            let state = StateDir::open(&settings.store.state_dir)?;
            info!(
                target = "restatic::main",
                op = "state",
                path = %state.root().display(),
                "Using file-backed state directory"
            );
            let install_id = match settings.webhook.install_id.clone() {
                Some(id) => id,
                None => state.install_id().await?,
            };
            let tasks: Arc<dyn TaskStore> = Arc::new(state.task_store());
            let leases: Arc<dyn LeaseStore> = Arc::new(state.lease_store());
            let logs: Arc<dyn LogStore> = Arc::new(state.log_store());
            (tasks, leases, logs, install_id)
        }
        StateBackend::Memory => {
            let install_id = settings
                .webhook
                .install_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let tasks: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
            let leases: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
            let logs: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());
            (tasks, leases, logs, install_id)
        }
    };

    let source =
        HttpContentSource::new(settings.builder.fetch_timeout, &settings.builder.user_agent)?;
    let cache = Arc::new(CacheStore::new(
        settings.store.cache_root.clone(),
        Arc::clone(&clock),
    ));
    let log = Arc::new(BuildLog::new(logs, settings.log.capacity.get()));
    let catalog: Arc<dyn SiteCatalog> = Arc::new(settings.site.catalog());

    let notifier = settings.webhook.url.as_ref().map(|endpoint| {
        Arc::new(Notifier::new(
            source.client().clone(),
            NotifierConfig {
                endpoint: Some(endpoint.clone()),
                mode: settings.webhook.notify_mode(),
                site: settings.site.label(),
                install_id: install_id.clone(),
                timeout: settings.webhook.timeout,
            },
            Arc::clone(&clock),
        ))
    });

    let mut builder = Builder::new(
        Arc::new(source),
        Arc::clone(&cache),
        Arc::clone(&catalog),
        Arc::clone(&log),
        Arc::clone(&clock),
        settings.builder.options(),
    );
    if let Some(notifier) = notifier.as_ref() {
        builder = builder.with_notifier(Arc::clone(notifier));
    }
    let builder = Arc::new(builder);

    let queue = Arc::new(BuildQueue::new(
        tasks,
        leases,
        Arc::clone(&builder),
        Arc::clone(&log),
        Arc::clone(&clock),
        settings.site.priorities.clone(),
        settings.queue.policy(),
    ));

    let mut service = StaticBuildService::new(queue, builder, cache, log, catalog)
        .with_ttl(settings.store.ttl)
        .with_auto_schedule(serving);
    if let Some(notifier) = notifier.as_ref() {
        service = service.with_notifier(Arc::clone(notifier));
    }

    Ok(ApplicationContext { service, notifier })
}

async fn run_serve(app: &ApplicationContext, settings: &config::Settings) -> Result<(), AppError> {
    let queue = Arc::clone(app.service.queue());

    let tick_queue = Arc::clone(&queue);
    let tick = settings.queue.tick;
    let tick_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            if let Err(err) = tick_queue.process_batch().await {
                warn!(
                    target = "restatic::main",
                    op = "tick",
                    error = %err,
                    "Periodic batch failed"
                );
            }
        }
    });

    let archive_handle = (settings.queue.archive_interval > Duration::ZERO).then(|| {
        let archive_queue = Arc::clone(&queue);
        let every = settings.queue.archive_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                match archive_queue.enqueue(TaskKind::ArchiveSet, None).await {
                    Ok(_) => {
                        archive_queue.schedule(archive_queue.policy().enqueue_delay);
                    }
                    Err(err) => warn!(
                        target = "restatic::main",
                        op = "archive_interval",
                        error = %err,
                        "Failed to enqueue periodic archive rebuild"
                    ),
                }
            }
        })
    });

    info!(
        target = "restatic::main",
        op = "serve",
        tick_secs = tick.as_secs(),
        archive_interval_secs = settings.queue.archive_interval.as_secs(),
        "Build queue running"
    );

    let shutdown = tokio::signal::ctrl_c().await;

    tick_handle.abort();
    if let Some(handle) = archive_handle {
        handle.abort();
    }
    queue.cancel_scheduled();

    shutdown.map_err(InfraError::from)?;

    if let Some(notifier) = app.notifier.as_ref() {
        notifier.flush().await?;
    }

    info!(target = "restatic::main", op = "serve", "Shutdown complete");
    Ok(())
}

async fn run_once(service: &StaticBuildService, command: Command) -> Result<(), AppError> {
    match command {
        Command::Serve => Err(AppError::unexpected("serve is not a one-shot command")),
        Command::Process => print_json(&service.process_now().await?),
        Command::Status => print_json(&service.status().await?),
        Command::Enqueue(args) => {
            let task = service
                .enqueue_single(
                    &args.target_id,
                    TargetCategory::new(args.category),
                    args.url,
                    args.priority,
                )
                .await?;
            print_json(&task)
        }
        Command::EnqueueArchives(args) => {
            print_json(&service.enqueue_archive_set(args.priority).await?)
        }
        Command::EnqueueFull(args) => {
            print_json(&service.enqueue_full_rebuild(args.priority).await?)
        }
        Command::EnqueueCategory(args) => {
            let category = TargetCategory::new(args.category);
            let enqueued = service.enqueue_category(&category, args.priority).await?;
            print_json(&serde_json::json!({ "category": category, "enqueued": enqueued }))
        }
        Command::Build(args) => {
            let page = service.build_now(&args.url).await?;
            print_json(&serde_json::json!({
                "url": page.url,
                "path": page.path,
                "bytes": page.bytes,
                "secondPass": page.second_pass,
            }))
        }
        Command::Purge(args) => {
            let purged = service.purge(&args.url).await?;
            print_json(&serde_json::json!({ "url": args.url, "purged": purged }))
        }
        Command::Log(args) => {
            let entries = service.log(args.limit).await?;
            let stats = service.stats().await?;
            print_json(&serde_json::json!({ "stats": stats, "entries": entries }))
        }
        Command::ClearLog => {
            service.clear_log().await?;
            print_json(&serde_json::json!({ "cleared": true }))
        }
        Command::ClearQueue => {
            let removed = service.clear_queue().await?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Command::RetryFailures(args) => {
            let category = TargetCategory::new(args.category);
            let retried = service.retry_failures(&category).await?;
            print_json(&serde_json::json!({ "category": category, "retried": retried }))
        }
        Command::ClearFailures(args) => {
            let category = TargetCategory::new(args.category);
            let cleared = service.clear_failures(&category).await?;
            print_json(&serde_json::json!({ "category": category, "cleared": cleared }))
        }
        Command::PingWebhook => {
            service.ping_webhook().await?;
            print_json(&serde_json::json!({ "delivered": true }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
