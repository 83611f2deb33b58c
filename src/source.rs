//! Upstream plugin source seam
//!
//! The forum scraping layer lives outside this crate; all it owes us is
//! structured [`PluginPage`] values. Implementations wrap whatever upstream
//! exists (a live forum scraper, a static mirror index, a fixture set for
//! tests) behind the same two calls.

use crate::error::Result;
use crate::types::PluginPage;
use async_trait::async_trait;

/// A source of plugin release pages
#[async_trait]
pub trait PluginSource: Send + Sync {
    /// Discover the page URLs currently published by this source
    async fn discover(&self) -> Result<Vec<String>>;

    /// Fetch and parse one plugin page into its structured form
    async fn fetch_page(&self, url: &str) -> Result<PluginPage>;
}

/// In-memory source backed by a fixed set of pages.
///
/// Useful for tests and for replaying a previously captured page set.
#[derive(Clone, Debug, Default)]
pub struct StaticSource {
    pages: Vec<PluginPage>,
}

impl StaticSource {
    /// Create a source over a fixed page set
    pub fn new(pages: Vec<PluginPage>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl PluginSource for StaticSource {
    async fn discover(&self) -> Result<Vec<String>> {
        Ok(self.pages.iter().map(|p| p.url.clone()).collect())
    }

    async fn fetch_page(&self, url: &str) -> Result<PluginPage> {
        self.pages
            .iter()
            .find(|p| p.url == url)
            .cloned()
            .ok_or_else(|| crate::error::Error::NotFound(format!("page {}", url)))
    }
}
