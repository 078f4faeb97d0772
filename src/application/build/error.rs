use std::path::PathBuf;

use thiserror::Error;

use super::catalog::CatalogError;
use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Non-200 status, empty body, or a transport failure.
    #[error("fetch failed for `{url}`: {detail}")]
    FetchFailed {
        url: String,
        status: Option<u16>,
        detail: String,
    },
    #[error("write failed for `{}`: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: CacheError,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Every page of an archive or full rebuild failed.
    #[error("all {failed} pages failed; first error: {first}")]
    SetFailed { failed: usize, first: String },
}

impl BuildError {
    pub(crate) fn fetch(url: impl Into<String>, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::FetchFailed {
            url: url.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "fetch_failed",
            Self::WriteFailed { .. } => "write_failed",
            Self::Catalog(_) => "catalog",
            Self::SetFailed { .. } => "set_failed",
        }
    }
}
