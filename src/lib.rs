//! Incremental static regeneration engine.
//!
//! A deduplicating, priority-ordered build queue renders pages through an HTTP content
//! source and commits them into a filesystem HTML cache with TTL staleness, purge-time
//! directory pruning and debounced webhook notification.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
