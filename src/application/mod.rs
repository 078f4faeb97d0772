//! Application layer: queue scheduling, page builds, notification and the admin facade.

pub mod build;
pub mod build_log;
pub mod clock;
pub mod error;
pub mod notify;
pub mod queue;
pub mod repos;
pub mod service;
