//! Domain layer types and invariants.

pub mod log;
pub mod task;
