use std::time::Duration;

use time::OffsetDateTime;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [30, 120, 300];
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_FOLLOW_UP_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_ENQUEUE_DELAY: Duration = Duration::from_secs(2);

/// Batch sizing, retry and timing knobs for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePolicy {
    pub max_batch_size: usize,
    /// Failed attempts that are still retried; the next failure drops the task.
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff[n - 1]`, clamped to the last entry.
    pub backoff: Vec<Duration>,
    pub lease_timeout: Duration,
    pub follow_up_delay: Duration,
    pub enqueue_delay: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            follow_up_delay: DEFAULT_FOLLOW_UP_DELAY,
            enqueue_delay: DEFAULT_ENQUEUE_DELAY,
        }
    }
}

/// What to do with a task whose build just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        attempts: u32,
        retry_after: OffsetDateTime,
    },
    GiveUp {
        attempts: u32,
    },
}

impl QueuePolicy {
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let index = attempts.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or(self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    /// Decide the fate of a task that had `previous_attempts` failures before this one.
    pub fn decide(&self, previous_attempts: u32, now: OffsetDateTime) -> RetryDecision {
        let attempts = previous_attempts.saturating_add(1);
        if attempts <= self.max_retries {
            RetryDecision::Retry {
                attempts,
                retry_after: now + self.backoff_for(attempts),
            }
        } else {
            RetryDecision::GiveUp { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn backoff_walks_the_table_then_gives_up() {
        let policy = QueuePolicy::default();
        let now = datetime!(2026-01-01 00:00 UTC);

        let mut attempts = 0;
        for expected in [30, 120, 300] {
            match policy.decide(attempts, now) {
                RetryDecision::Retry {
                    attempts: next,
                    retry_after,
                } => {
                    assert_eq!(retry_after - now, time::Duration::seconds(expected));
                    attempts = next;
                }
                RetryDecision::GiveUp { .. } => panic!("gave up too early"),
            }
        }

        assert_eq!(
            policy.decide(attempts, now),
            RetryDecision::GiveUp { attempts: 4 }
        );
    }

    #[test]
    fn backoff_clamps_to_last_entry() {
        let policy = QueuePolicy {
            max_retries: 10,
            ..QueuePolicy::default()
        };
        assert_eq!(policy.backoff_for(9), Duration::from_secs(300));

        let empty = QueuePolicy {
            backoff: Vec::new(),
            ..QueuePolicy::default()
        };
        assert_eq!(empty.backoff_for(1), Duration::ZERO);
    }
}
