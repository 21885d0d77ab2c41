//! Page fetcher implementations.
//!
//! # Available Fetchers
//!
//! - `HttpFetcher` - Plain HTTP GET with browser-like headers
//! - `FirecrawlFetcher` - Firecrawl API rendering (requires `firecrawl` feature)
//! - `MockFetcher` - For testing
//!
//! # Example
//!
//! ```rust,ignore
//! use listing_sync::fetchers::{HttpFetcher, PageFetcher};
//!
//! let fetcher = HttpFetcher::new()?;
//! let page = fetcher.fetch("https://www.udemy.com/course/rust/").await?;
//! ```

mod http;
mod mock;

#[cfg(feature = "firecrawl")]
mod firecrawl;

pub use http::HttpFetcher;
pub use mock::MockFetcher;

#[cfg(feature = "firecrawl")]
pub use firecrawl::FirecrawlFetcher;

// Re-export from traits for convenience
pub use crate::traits::fetcher::{PageFetcher, RenderedPage};
