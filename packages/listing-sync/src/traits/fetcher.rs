//! Page fetcher trait.
//!
//! A fetcher loads a listing's page and hands back its DOM as HTML. It
//! knows nothing about which elements matter; that is the extractor's job.
//!
//! ```rust,ignore
//! use listing_sync::traits::fetcher::PageFetcher;
//!
//! let page = fetcher.fetch("https://www.udemy.com/course/rust/").await?;
//! println!("{} bytes", page.html.len());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FetchError, FetchResult};

/// A loaded page, ready for selector evaluation.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// URL that was requested
    pub url: String,

    /// Page HTML (rendered DOM when the fetcher runs JavaScript)
    pub html: String,

    /// HTTP status the page was served with
    pub status: u16,

    /// When the page was loaded
    pub fetched_at: DateTime<Utc>,
}

impl RenderedPage {
    /// Create a new page fetched now.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            status: 200,
            fetched_at: Utc::now(),
        }
    }

    /// Set the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Whether the server reported the page as gone or missing.
    pub fn is_missing(&self) -> bool {
        matches!(self.status, 404 | 410)
    }

    /// Set the fetched timestamp.
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }
}

/// Loads pages. Exactly one load per call, never cached: the point of a
/// re-check is to see the page as it is now.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Load a single page.
    ///
    /// Fails only when the page itself cannot be loaded (network error,
    /// timeout, server error or throttling). A removed page is still a
    /// page: it comes back with its status and whatever body was served.
    async fn fetch(&self, url: &str) -> FetchResult<RenderedPage>;

    /// Get the fetcher name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Check that a listing URL is something we can load.
pub fn validate_url(url: &str) -> FetchResult<url::Url> {
    let invalid = || FetchError::InvalidUrl {
        url: url.to_string(),
    };

    if url.trim().is_empty() {
        return Err(invalid());
    }

    let parsed = url::Url::parse(url).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(invalid()),
    }
}
