//! Infrastructure adapters: telemetry, HTTP, and state persistence.

pub mod error;
pub mod http_source;
pub mod memory;
pub mod state_dir;
pub mod telemetry;
