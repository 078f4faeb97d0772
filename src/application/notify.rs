//! Outbound webhook delivery after successful builds.
//!
//! Three modes:
//!
//! - `Off`: nothing is sent.
//! - `Immediate`: every build triggers a fire-and-forget POST bounded by a timeout.
//! - `Debounced(window)`: the first build opens a window; builds inside it are absorbed and
//!   a single `site.updated` delivery goes out when the window closes.
//!
//! Delivery failures are logged and never retried; the next build triggers again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::application::clock::Clock;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::notify";

pub const EVENT_BUILD_COMPLETED: &str = "build.completed";
pub const EVENT_SITE_UPDATED: &str = "site.updated";
pub const EVENT_TEST_PING: &str = "test.ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    Off,
    Immediate,
    Debounced(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: String,
    pub site: String,
    pub install_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// What a call to [`Notifier::notify`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Mode is off or no endpoint is configured.
    Disabled,
    /// A delivery was spawned right away.
    Dispatched,
    /// A new debounce window opened; delivery happens at `fires_at`.
    Scheduled { fires_at: OffsetDateTime },
    /// Absorbed into the window that is already open.
    Coalesced { fires_at: OffsetDateTime },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no webhook endpoint configured")]
    NotConfigured,
    #[error("webhook delivery failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook endpoint answered HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub endpoint: Option<Url>,
    pub mode: NotifyMode,
    pub site: String,
    pub install_id: String,
    pub timeout: Duration,
}

struct PendingDelivery {
    fires_at: OffsetDateTime,
    handle: JoinHandle<()>,
}

pub struct Notifier {
    client: Client,
    config: NotifierConfig,
    clock: Arc<dyn Clock>,
    pending: Mutex<Option<PendingDelivery>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl Notifier {
    pub fn new(client: Client, config: NotifierConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            config,
            clock,
            pending: Mutex::new(None),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Signal a successful build. Must be called from within a Tokio runtime.
    pub fn notify(self: &Arc<Self>, url: Option<&Url>) -> NotifyOutcome {
        if self.config.endpoint.is_none() {
            return NotifyOutcome::Disabled;
        }

        match self.config.mode {
            NotifyMode::Off => NotifyOutcome::Disabled,
            NotifyMode::Immediate => {
                let payload = self.payload(EVENT_BUILD_COMPLETED, url);
                let notifier = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    let _ = notifier.deliver(&payload).await;
                });
                let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "immediate");
                in_flight.retain(|handle| !handle.is_finished());
                in_flight.push(handle);
                NotifyOutcome::Dispatched
            }
            NotifyMode::Debounced(window) => self.debounce(window),
        }
    }

    fn debounce(self: &Arc<Self>, window: Duration) -> NotifyOutcome {
        let mut pending = mutex_lock(&self.pending, SOURCE, "debounce");
        if let Some(open) = pending.as_ref() {
            return NotifyOutcome::Coalesced {
                fires_at: open.fires_at,
            };
        }

        let fires_at = self.clock.now() + window;
        let notifier = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // Close the window before sending so builds during delivery open a new one.
            mutex_lock(&notifier.pending, SOURCE, "debounce.fire").take();
            let payload = notifier.payload(EVENT_SITE_UPDATED, None);
            let _ = notifier.deliver(&payload).await;
        });
        *pending = Some(PendingDelivery { fires_at, handle });

        info!(
            target = "restatic::notify",
            op = "debounce",
            window_secs = window.as_secs(),
            "Webhook debounce window opened"
        );
        NotifyOutcome::Scheduled { fires_at }
    }

    /// When the open debounce window will deliver, if any.
    pub fn pending_delivery(&self) -> Option<OffsetDateTime> {
        mutex_lock(&self.pending, SOURCE, "pending_delivery")
            .as_ref()
            .map(|open| open.fires_at)
    }

    /// Drop an open debounce window without delivering.
    pub fn cancel_pending(&self) -> bool {
        match mutex_lock(&self.pending, SOURCE, "cancel_pending").take() {
            Some(open) => {
                open.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Wait for immediate deliveries still in flight, then deliver an open debounce window
    /// now instead of waiting for it to close.
    ///
    /// Returns false when there was nothing outstanding. Only the debounce delivery reports
    /// its failure; immediate deliveries log their own.
    pub async fn flush(&self) -> Result<bool, NotifyError> {
        let in_flight = std::mem::take(&mut *mutex_lock(&self.in_flight, SOURCE, "flush"));
        let mut flushed = !in_flight.is_empty();
        for handle in in_flight {
            if let Err(err) = handle.await {
                warn!(
                    target = "restatic::notify",
                    op = "flush",
                    error = %err,
                    "Immediate webhook delivery task did not complete"
                );
            }
        }

        let Some(open) = mutex_lock(&self.pending, SOURCE, "flush").take() else {
            return Ok(flushed);
        };
        open.handle.abort();
        flushed = true;
        let payload = self.payload(EVENT_SITE_UPDATED, None);
        self.deliver(&payload).await?;
        Ok(flushed)
    }

    /// Send a `test.ping` synchronously, ignoring the configured mode.
    pub async fn ping(&self) -> Result<(), NotifyError> {
        let payload = self.payload(EVENT_TEST_PING, None);
        self.deliver(&payload).await
    }

    pub fn payload(&self, event: &str, url: Option<&Url>) -> WebhookPayload {
        WebhookPayload {
            event: event.to_string(),
            site: self.config.site.clone(),
            install_id: self.config.install_id.clone(),
            url: url.map(|url| url.to_string()),
            timestamp: self.clock.now(),
        }
    }

    /// POST `payload` to the endpoint with the configured timeout. Failures are logged here.
    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let endpoint = self
            .config
            .endpoint
            .as_ref()
            .ok_or(NotifyError::NotConfigured)?;

        let result = self
            .client
            .post(endpoint.clone())
            .timeout(self.config.timeout)
            .json(payload)
            .send()
            .await
            .map_err(NotifyError::from)
            .and_then(|response| {
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(NotifyError::Status(status.as_u16()))
                }
            });

        match &result {
            Ok(()) => {
                counter!("restatic_webhook_total", "result" => "ok").increment(1);
                info!(
                    target = "restatic::notify",
                    op = "deliver",
                    event = %payload.event,
                    result = "ok",
                    "Webhook delivered"
                );
            }
            Err(err) => {
                counter!("restatic_webhook_total", "result" => "error").increment(1);
                warn!(
                    target = "restatic::notify",
                    op = "deliver",
                    event = %payload.event,
                    result = "error",
                    error = %err,
                    "Webhook delivery failed"
                );
            }
        }
        result
    }
}
