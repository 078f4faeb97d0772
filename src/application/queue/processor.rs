use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::policy::{QueuePolicy, RetryDecision};
use super::status::QueueStatus;
use crate::application::build::{BuildError, Builder};
use crate::application::build_log::BuildLog;
use crate::application::clock::Clock;
use crate::application::repos::{LeaseStore, StoreError, TaskStore};
use crate::domain::log::{LogEntry, LogKind, LogStatus};
use crate::domain::task::{
    PriorityTable, TargetCategory, Task, TaskKind, UpsertMode, schedule_order,
};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::queue::processor";

/// Result of one `run_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// False when another run held the lease and this call did nothing.
    pub ran: bool,
    /// Dedup keys in the order they were built.
    pub processed: Vec<String>,
    pub succeeded: usize,
    pub retried: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// Earliest time a remaining task becomes eligible.
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_due: Option<OffsetDateTime>,
}

struct ScheduledRun {
    at: OffsetDateTime,
    handle: JoinHandle<()>,
}

/// Scheduler and processor for build tasks.
pub struct BuildQueue {
    tasks: Arc<dyn TaskStore>,
    leases: Arc<dyn LeaseStore>,
    builder: Arc<Builder>,
    log: Arc<BuildLog>,
    clock: Arc<dyn Clock>,
    priorities: PriorityTable,
    policy: QueuePolicy,
    timer: Mutex<Option<ScheduledRun>>,
}

impl BuildQueue {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        leases: Arc<dyn LeaseStore>,
        builder: Arc<Builder>,
        log: Arc<BuildLog>,
        clock: Arc<dyn Clock>,
        priorities: PriorityTable,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            tasks,
            leases,
            builder,
            log,
            clock,
            priorities,
            policy,
            timer: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Insert or overwrite the task for `kind`, resetting its attempt history.
    pub async fn enqueue(&self, kind: TaskKind, priority: Option<i32>) -> Result<Task, StoreError> {
        let priority = priority.unwrap_or_else(|| self.priorities.for_kind(&kind));
        let task = Task::new(kind, priority, self.clock.now());
        let stored = self.tasks.upsert(task, UpsertMode::Reset).await?;

        info!(
            target = "restatic::queue",
            op = "enqueue",
            dedup_key = %stored.dedup_key,
            priority = stored.priority,
            "Build task enqueued"
        );
        Ok(stored)
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.tasks.all().await?;
        tasks.sort_by(schedule_order);
        Ok(tasks)
    }

    /// Drop every task and any pending timer.
    ///
    /// A batch that is still running keeps its lease; only an expired lease is released.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.tasks.clear().await?;
        if let Some(lease) = self.leases.current().await?
            && lease.is_expired(self.clock.now(), self.policy.lease_timeout)
        {
            self.leases.force_clear().await?;
        }
        self.cancel_scheduled();
        gauge!("restatic_queue_len").set(0.0);

        info!(
            target = "restatic::queue",
            op = "clear",
            removed,
            "Build queue cleared"
        );
        Ok(removed)
    }

    pub async fn status(&self) -> Result<QueueStatus, StoreError> {
        let now = self.clock.now();
        let tasks = self.tasks.all().await?;
        let processing = self
            .leases
            .current()
            .await?
            .is_some_and(|lease| !lease.is_expired(now, self.policy.lease_timeout));
        Ok(QueueStatus::collect(
            &tasks,
            now,
            processing,
            self.next_scheduled(),
        ))
    }

    /// Make failed single tasks of `category` eligible again at their category priority.
    pub async fn retry_failures(&self, category: &TargetCategory) -> Result<usize, StoreError> {
        let priority = self.priorities.for_category(category);
        let mut retried = 0;
        for mut task in self.failing_in(category).await? {
            task.attempts = 0;
            task.last_error = None;
            task.retry_after = None;
            task.priority = priority;
            if self.tasks.replace_if_current(&task).await? {
                retried += 1;
            }
        }

        info!(
            target = "restatic::queue",
            op = "retry_failures",
            category = %category,
            retried,
            "Failed tasks reset for retry"
        );
        Ok(retried)
    }

    /// Remove failed single tasks of `category`.
    pub async fn clear_failures(&self, category: &TargetCategory) -> Result<usize, StoreError> {
        let mut cleared = 0;
        for task in self.failing_in(category).await? {
            if self.tasks.remove_if_current(&task.dedup_key, task.id).await? {
                cleared += 1;
            }
        }

        info!(
            target = "restatic::queue",
            op = "clear_failures",
            category = %category,
            cleared,
            "Failed tasks removed"
        );
        Ok(cleared)
    }

    async fn failing_in(&self, category: &TargetCategory) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .all()
            .await?
            .into_iter()
            .filter(|task| task.is_failing() && task.kind.category() == Some(category))
            .collect())
    }

    /// Run one batch, then schedule a follow-up run while tasks remain.
    pub async fn process_batch(self: &Arc<Self>) -> Result<BatchReport, StoreError> {
        let report = self.run_batch().await?;
        if report.ran && report.remaining > 0 {
            let now = self.clock.now();
            let until_due = report
                .next_due
                .map(|due| Duration::try_from(due - now).unwrap_or_default())
                .unwrap_or_default();
            self.schedule(until_due.max(self.policy.follow_up_delay));
        }
        Ok(report)
    }

    /// Run one batch without scheduling a follow-up. A no-op while another run holds the lease.
    #[instrument(skip(self))]
    pub async fn run_batch(&self) -> Result<BatchReport, StoreError> {
        let now = self.clock.now();
        let Some(lease) = self
            .leases
            .try_acquire(now, self.policy.lease_timeout)
            .await?
        else {
            debug!(
                target = "restatic::queue",
                op = "run_batch",
                result = "lease_held",
                "Another batch is in progress"
            );
            return Ok(BatchReport::default());
        };

        let result = self.drain_batch(now).await;

        if let Err(err) = self.leases.release(&lease).await {
            warn!(
                target = "restatic::queue",
                op = "run_batch",
                error = %err,
                "Failed to release batch lease; it will expire on its own"
            );
        }
        result
    }

    async fn drain_batch(&self, now: OffsetDateTime) -> Result<BatchReport, StoreError> {
        let mut batch: Vec<Task> = self
            .tasks
            .all()
            .await?
            .into_iter()
            .filter(|task| task.is_due(now))
            .collect();
        batch.sort_by(schedule_order);
        batch.truncate(self.policy.max_batch_size);

        let mut report = BatchReport {
            ran: true,
            ..BatchReport::default()
        };

        for task in batch {
            report.processed.push(task.dedup_key.clone());
            match self.builder.build_task(&task).await {
                Ok(_) => {
                    if !self
                        .tasks
                        .remove_if_current(&task.dedup_key, task.id)
                        .await?
                    {
                        debug!(
                            target = "restatic::queue",
                            op = "complete",
                            dedup_key = %task.dedup_key,
                            "Task was re-enqueued during its build; keeping the newer entry"
                        );
                    }
                    report.succeeded += 1;
                }
                Err(err) => self.record_failure(task, &err, &mut report).await?,
            }
        }

        let remaining = self.tasks.all().await?;
        report.remaining = remaining.len();
        report.next_due = remaining
            .iter()
            .map(|task| task.retry_after.unwrap_or(task.added_at))
            .min();
        gauge!("restatic_queue_len").set(remaining.len() as f64);

        info!(
            target = "restatic::queue",
            op = "run_batch",
            processed = report.processed.len(),
            succeeded = report.succeeded,
            retried = report.retried,
            dropped = report.dropped,
            remaining = report.remaining,
            "Batch finished"
        );
        Ok(report)
    }

    async fn record_failure(
        &self,
        mut task: Task,
        err: &BuildError,
        report: &mut BatchReport,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        match self.policy.decide(task.attempts, now) {
            RetryDecision::Retry {
                attempts,
                retry_after,
            } => {
                task.attempts = attempts;
                task.last_error = Some(err.to_string());
                task.retry_after = Some(retry_after);
                self.tasks.replace_if_current(&task).await?;
                report.retried += 1;

                warn!(
                    target = "restatic::queue",
                    op = "retry",
                    dedup_key = %task.dedup_key,
                    attempts,
                    retry_in_secs = self.policy.backoff_for(attempts).as_secs(),
                    error = %err,
                    "Build failed; task rescheduled"
                );
            }
            RetryDecision::GiveUp { attempts } => {
                self.tasks
                    .remove_if_current(&task.dedup_key, task.id)
                    .await?;
                report.dropped += 1;
                counter!("restatic_task_dropped_total").increment(1);

                error!(
                    target = "restatic::queue",
                    op = "give_up",
                    dedup_key = %task.dedup_key,
                    attempts,
                    error = %err,
                    "Build failed permanently; task dropped"
                );
                let mut entry = LogEntry::new(
                    now,
                    LogKind::from(&task.kind),
                    LogStatus::Error,
                    format!("Gave up after {attempts} attempts: {err}"),
                )
                .with_meta("dedup_key", task.dedup_key.clone())
                .with_meta("attempts", attempts)
                .with_meta("terminal", true);
                if let Some(url) = task.url() {
                    entry = entry.with_url(url.as_str());
                }
                self.log.record(entry).await;
            }
        }
        Ok(())
    }

    /// Arrange a `process_batch` run after `delay` unless one is already pending.
    ///
    /// Returns the time of the pending run. Must be called from within a Tokio runtime.
    pub fn schedule(self: &Arc<Self>, delay: Duration) -> OffsetDateTime {
        let mut slot = mutex_lock(&self.timer, SOURCE, "schedule");
        if let Some(pending) = slot.as_ref()
            && !pending.handle.is_finished()
        {
            return pending.at;
        }

        let at = self.clock.now() + delay;
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mutex_lock(&queue.timer, SOURCE, "timer.fire").take();
            if let Err(err) = queue.process_batch().await {
                warn!(
                    target = "restatic::queue",
                    op = "scheduled_run",
                    error = %err,
                    "Scheduled batch failed"
                );
            }
        });
        *slot = Some(ScheduledRun { at, handle });

        debug!(
            target = "restatic::queue",
            op = "schedule",
            delay_ms = delay.as_millis() as u64,
            "Batch run scheduled"
        );
        at
    }

    pub fn next_scheduled(&self) -> Option<OffsetDateTime> {
        mutex_lock(&self.timer, SOURCE, "next_scheduled")
            .as_ref()
            .filter(|pending| !pending.handle.is_finished())
            .map(|pending| pending.at)
    }

    pub fn cancel_scheduled(&self) -> bool {
        match mutex_lock(&self.timer, SOURCE, "cancel_scheduled").take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }
}
