use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Raw response from the rendering backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Rendering backend that turns a URL into fully rendered HTML.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

/// Append `key=value` to the query of `url`, keeping any existing parameters.
pub fn with_query_marker(url: &Url, key: &str, value: &str) -> Url {
    let mut marked = url.clone();
    marked.query_pairs_mut().append_pair(key, value);
    marked
}
