//! Extractor trait.

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::types::extraction::ExtractionResult;

/// Reads a listing's volatile attributes from its page.
///
/// Field misses are reported as absent fields in the result. An `Err` means
/// the page could not be loaded at all, so the caller can skip the listing
/// instead of recording nulls that were never observed.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Load `url` and read expiry, discount and categories from it.
    async fn extract(&self, url: &str) -> FetchResult<ExtractionResult>;

    /// Get the extractor name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<T: Extractor + ?Sized> Extractor for std::sync::Arc<T> {
    async fn extract(&self, url: &str) -> FetchResult<ExtractionResult> {
        (**self).extract(url).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
