//! Page builds: fetch through the content source, post-process, commit to the cache.

mod builder;
mod catalog;
mod error;
mod inject;
mod late_loading;
mod optimize;
mod source;

pub use builder::{BuildOptions, BuildOutcome, Builder, PageBuild, PageFailure};
pub use catalog::{BuildTarget, CatalogError, SiteCatalog, StaticCatalog};
pub use error::BuildError;
pub use inject::{BUILD_MARKER_PREFIX, inject_build_metadata};
pub use late_loading::{LATE_CONTENT_PATTERNS, has_late_loading_content};
pub use optimize::{OptimizeOptions, OptimizeReport, Optimized, optimize_html};
pub use source::{ContentSource, FetchError, FetchResponse, with_query_marker};
