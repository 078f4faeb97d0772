use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber described by `logging`.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "restatic_build_total",
            Unit::Count,
            "Build tasks executed, labelled by task kind and result."
        );
        describe_histogram!(
            "restatic_build_ms",
            Unit::Milliseconds,
            "Wall time of one build task in milliseconds."
        );
        describe_counter!(
            "restatic_task_dropped_total",
            Unit::Count,
            "Tasks dropped after exhausting their retries."
        );
        describe_gauge!(
            "restatic_queue_len",
            Unit::Count,
            "Tasks left in the queue after the last batch."
        );
        describe_counter!(
            "restatic_webhook_total",
            Unit::Count,
            "Webhook deliveries, labelled by result."
        );
    });
}
