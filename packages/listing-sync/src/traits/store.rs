//! Storage trait for tracked listings.
//!
//! One contract, implemented once per backend:
//! - `RelationalStore`: categories normalized into a lookup table plus a
//!   junction table
//! - `DocumentStore`: categories embedded as an array on the document
//! - `MemoryStore`: document-shaped, in process
//!
//! The pipeline is generic over this trait and never looks at which
//! backend it is talking to.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::types::extraction::normalize_categories;
use crate::types::listing::{
    CandidateFilter, CategoryReport, Listing, PurgeReport, ScalarFields, UpdateOutcome,
};

/// Stream of candidate listings in store order.
pub type ListingStream<'a, K> = BoxStream<'a, StoreResult<Listing<K>>>;

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// How this backend identifies a listing.
    type Key: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Stream the listings selected by `filter`.
    ///
    /// Backends that can page through results must not hold more than one
    /// page in memory.
    fn list_candidates(&self, filter: CandidateFilter) -> ListingStream<'_, Self::Key>;

    /// Get a listing by key.
    async fn get_listing(&self, key: &Self::Key) -> StoreResult<Option<Listing<Self::Key>>>;

    /// Get a listing by its source URL.
    async fn find_by_url(&self, url: &str) -> StoreResult<Option<Listing<Self::Key>>>;

    /// Register a listing for `url`, or return the existing one.
    async fn seed(&self, url: &str) -> StoreResult<Listing<Self::Key>>;

    /// Overwrite expiry and discount, last extraction wins.
    ///
    /// Always touches `last_updated`, even when both fields are `None` or
    /// nothing changed: the write records that the page was re-checked.
    async fn upsert_scalar_fields(
        &self,
        key: &Self::Key,
        fields: &ScalarFields,
    ) -> StoreResult<UpdateOutcome>;

    /// Add each category name to the listing if it is not already there.
    ///
    /// Additive only and idempotent. A failure on one name is reported in
    /// the returned [`CategoryReport`] and does not stop the others; only
    /// fatal errors are returned as `Err`.
    async fn reconcile_categories(
        &self,
        key: &Self::Key,
        names: &[String],
    ) -> StoreResult<CategoryReport>;

    /// Delete every listing whose expiry was never populated.
    async fn purge_incomplete(&self) -> StoreResult<PurgeReport>;

    /// Release connections. Further calls may fail.
    async fn close(&self) {}
}

#[async_trait]
impl<S: ListingStore + ?Sized> ListingStore for Arc<S> {
    type Key = S::Key;

    fn list_candidates(&self, filter: CandidateFilter) -> ListingStream<'_, Self::Key> {
        (**self).list_candidates(filter)
    }

    async fn get_listing(&self, key: &Self::Key) -> StoreResult<Option<Listing<Self::Key>>> {
        (**self).get_listing(key).await
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<Listing<Self::Key>>> {
        (**self).find_by_url(url).await
    }

    async fn seed(&self, url: &str) -> StoreResult<Listing<Self::Key>> {
        (**self).seed(url).await
    }

    async fn upsert_scalar_fields(
        &self,
        key: &Self::Key,
        fields: &ScalarFields,
    ) -> StoreResult<UpdateOutcome> {
        (**self).upsert_scalar_fields(key, fields).await
    }

    async fn reconcile_categories(
        &self,
        key: &Self::Key,
        names: &[String],
    ) -> StoreResult<CategoryReport> {
        (**self).reconcile_categories(key, names).await
    }

    async fn purge_incomplete(&self) -> StoreResult<PurgeReport> {
        (**self).purge_incomplete().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Normalize candidate names before they reach a backend.
pub(crate) fn category_candidates(names: &[String]) -> Vec<String> {
    normalize_categories(names.iter().cloned())
}
