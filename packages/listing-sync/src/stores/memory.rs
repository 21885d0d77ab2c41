//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::{category_candidates, ListingStore, ListingStream};
use crate::types::listing::{
    CandidateFilter, CategoryReport, Listing, PurgeReport, ScalarFields, UpdateOutcome,
};

/// In-memory listing store, shaped like the document backend: keyed by
/// source URL with categories embedded on each listing.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    listings: RwLock<BTreeMap<String, Listing<String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            listings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace a listing as-is (for fixtures).
    pub fn insert(&self, listing: Listing<String>) {
        self.listings
            .write()
            .unwrap()
            .insert(listing.key.clone(), listing);
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.listings.write().unwrap().clear();
    }

    /// Get the number of stored listings.
    pub fn listing_count(&self) -> usize {
        self.listings.read().unwrap().len()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    type Key = String;

    fn list_candidates(&self, filter: CandidateFilter) -> ListingStream<'_, String> {
        let snapshot: Vec<_> = self
            .listings
            .read()
            .unwrap()
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();

        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }

    async fn get_listing(&self, key: &String) -> StoreResult<Option<Listing<String>>> {
        Ok(self.listings.read().unwrap().get(key).cloned())
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<Listing<String>>> {
        Ok(self.listings.read().unwrap().get(url).cloned())
    }

    async fn seed(&self, url: &str) -> StoreResult<Listing<String>> {
        let mut listings = self.listings.write().unwrap();
        let listing = listings
            .entry(url.to_string())
            .or_insert_with(|| Listing::new(url.to_string(), url));
        Ok(listing.clone())
    }

    async fn upsert_scalar_fields(
        &self,
        key: &String,
        fields: &ScalarFields,
    ) -> StoreResult<UpdateOutcome> {
        let mut listings = self.listings.write().unwrap();
        let listing = listings
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        let changed = fields.differs_from(listing);
        listing.expiry_status = fields.expiry_status.clone();
        listing.discount = fields.discount.clone();
        listing.last_updated = Some(Utc::now());

        Ok(UpdateOutcome { changed })
    }

    async fn reconcile_categories(
        &self,
        key: &String,
        names: &[String],
    ) -> StoreResult<CategoryReport> {
        let mut listings = self.listings.write().unwrap();
        let listing = listings
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        let mut report = CategoryReport::default();
        for name in category_candidates(names) {
            if listing.categories.insert(name) {
                report.added += 1;
            } else {
                report.already_present += 1;
            }
        }

        if report.added > 0 {
            listing.last_updated = Some(Utc::now());
        }

        Ok(report)
    }

    async fn purge_incomplete(&self) -> StoreResult<PurgeReport> {
        let mut listings = self.listings.write().unwrap();
        let before = listings.len();
        listings.retain(|_, l| !l.is_incomplete());

        Ok(PurgeReport {
            listings_removed: (before - listings.len()) as u64,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.seed("https://x/1").await.unwrap();
        store
            .upsert_scalar_fields(&first.key, &ScalarFields::new(Some("soon".into()), None))
            .await
            .unwrap();

        let again = store.seed("https://x/1").await.unwrap();
        assert_eq!(again.expiry_status.as_deref(), Some("soon"));
        assert_eq!(store.listing_count(), 1);
    }

    #[tokio::test]
    async fn test_null_scalar_upsert_touches_timestamp() {
        let store = MemoryStore::new();
        let listing = store.seed("https://x/1").await.unwrap();

        let outcome = store
            .upsert_scalar_fields(&listing.key, &ScalarFields::default())
            .await
            .unwrap();
        assert!(!outcome.changed);

        let stored = store.get_listing(&listing.key).await.unwrap().unwrap();
        assert!(stored.last_updated.is_some());
        assert!(stored.expiry_status.is_none());
        assert!(stored.discount.is_none());
    }

    #[tokio::test]
    async fn test_upsert_unknown_key() {
        let store = MemoryStore::new();
        let err = store
            .upsert_scalar_fields(&"https://missing".to_string(), &ScalarFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_categories_is_idempotent() {
        let store = MemoryStore::new();
        let listing = store.seed("https://x/1").await.unwrap();

        let first = store
            .reconcile_categories(&listing.key, &names(&["A", "B"]))
            .await
            .unwrap();
        assert_eq!(first.added, 2);

        let second = store
            .reconcile_categories(&listing.key, &names(&["A", "B"]))
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.already_present, 2);

        let stored = store.get_listing(&listing.key).await.unwrap().unwrap();
        assert_eq!(stored.categories.len(), 2);
    }

    #[tokio::test]
    async fn test_candidates_and_purge() {
        let store = MemoryStore::new();
        for url in ["https://x/1", "https://x/2", "https://x/3"] {
            store.seed(url).await.unwrap();
        }
        store
            .upsert_scalar_fields(
                &"https://x/1".to_string(),
                &ScalarFields::new(Some("expired".into()), None),
            )
            .await
            .unwrap();

        let with_expiry: Vec<_> = store
            .list_candidates(CandidateFilter::HasExpiry)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(with_expiry.len(), 1);
        assert_eq!(with_expiry[0].source_url, "https://x/1");

        assert_eq!(store.purge_incomplete().await.unwrap().listings_removed, 2);
        assert_eq!(store.purge_incomplete().await.unwrap().listings_removed, 0);
        assert_eq!(store.listing_count(), 1);
    }
}
