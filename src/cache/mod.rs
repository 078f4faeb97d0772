//! Static HTML cache.
//!
//! Every absolute URL maps to exactly one file:
//!
//! ```text
//! {root}/{host}/{path segments...}/index.html
//! ```
//!
//! Writes are committed with a temp-file-then-rename so a reader only ever sees a complete,
//! previously successful render. Purging removes the file and prunes directories that
//! became empty, stopping below the cache root.

mod error;
mod paths;
mod store;

pub use error::CacheError;
pub use paths::relative_path_for;
pub use store::{CacheLookup, CacheStore};
