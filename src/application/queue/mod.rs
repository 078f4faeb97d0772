//! Build queue: deduplicated tasks, single-flight batch processing and retry scheduling.

mod policy;
mod processor;
mod status;

pub use policy::{QueuePolicy, RetryDecision};
pub use processor::{BatchReport, BuildQueue};
pub use status::{FailingTask, KindCounts, QueueStatus};
