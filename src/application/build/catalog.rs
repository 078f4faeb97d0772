use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::domain::task::TargetCategory;

/// One buildable page known to the site.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildTarget {
    pub id: String,
    pub category: TargetCategory,
    pub url: Url,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("site catalog unavailable: {0}")]
    Unavailable(String),
}

/// Source of the page inventory used by archive and full rebuilds.
#[async_trait]
pub trait SiteCatalog: Send + Sync {
    /// Every target currently eligible for a static build.
    async fn targets(&self) -> Result<Vec<BuildTarget>, CatalogError>;

    /// Home page first, then listing pages (pagination, taxonomies, dates, authors).
    async fn archive_urls(&self) -> Result<Vec<Url>, CatalogError>;
}

/// Catalog fixed at construction time, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    home: Option<Url>,
    archives: Vec<Url>,
    targets: Vec<BuildTarget>,
}

impl StaticCatalog {
    pub fn new(home: Option<Url>, archives: Vec<Url>, targets: Vec<BuildTarget>) -> Self {
        Self {
            home,
            archives,
            targets,
        }
    }
}

#[async_trait]
impl SiteCatalog for StaticCatalog {
    async fn targets(&self) -> Result<Vec<BuildTarget>, CatalogError> {
        Ok(self.targets.clone())
    }

    async fn archive_urls(&self) -> Result<Vec<Url>, CatalogError> {
        let mut urls: Vec<Url> = Vec::with_capacity(self.archives.len() + 1);
        for url in self.home.iter().chain(self.archives.iter()) {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(value: &str) -> Url {
        Url::parse(value).expect("valid url")
    }

    #[tokio::test]
    async fn archive_urls_start_with_home_and_skip_duplicates() {
        let catalog = StaticCatalog::new(
            Some(url("https://example.com/")),
            vec![
                url("https://example.com/blog/"),
                url("https://example.com/"),
                url("https://example.com/blog/page/2/"),
            ],
            Vec::new(),
        );

        let urls = catalog.archive_urls().await.expect("archive urls");
        let urls: Vec<_> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            [
                "https://example.com/",
                "https://example.com/blog/",
                "https://example.com/blog/page/2/"
            ]
        );
    }
}
