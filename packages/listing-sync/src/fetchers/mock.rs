//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{PageFetcher, RenderedPage};

/// Mock fetcher serving canned HTML.
///
/// Unknown URLs answer with an empty 404 page, like a removed listing.
/// URLs marked as failing answer with a timeout.
///
/// # Example
///
/// ```rust
/// use listing_sync::fetchers::MockFetcher;
///
/// let mock = MockFetcher::new().with_page("https://x/1", "<html></html>");
/// ```
#[derive(Default, Clone)]
pub struct MockFetcher {
    pages: Arc<RwLock<HashMap<String, String>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockFetcher {
    /// Create a new empty mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page that will be returned by fetch.
    pub fn add_page(&self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.write().unwrap().insert(url.into(), html.into());
    }

    /// Add a page (builder pattern).
    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.add_page(url, html);
        self
    }

    /// Make fetches of this URL time out.
    pub fn fail_url(&self, url: impl Into<String>) {
        self.failing.write().unwrap().insert(url.into());
    }

    /// Make fetches of this URL time out (builder pattern).
    pub fn with_failure(self, url: impl Into<String>) -> Self {
        self.fail_url(url);
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of fetches made.
    pub fn fetch_call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Get the URLs fetched, in order.
    pub fn fetch_calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    /// Clear recorded calls.
    pub fn reset_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<RenderedPage> {
        self.calls.write().unwrap().push(url.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.read().unwrap().contains(url) {
            return Err(FetchError::Timeout {
                url: url.to_string(),
            });
        }

        let html = self.pages.read().unwrap().get(url).cloned();
        match html {
            Some(html) => Ok(RenderedPage::new(url, html)),
            None => Ok(RenderedPage::new(url, "<html><body>Not Found</body></html>").with_status(404)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
