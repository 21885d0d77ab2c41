//! Testing utilities including mock implementations.
//!
//! These are useful for testing passes without making network calls or
//! standing up a database.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{FetchError, FetchResult, StoreError, StoreResult};
use crate::traits::{
    extractor::Extractor,
    store::{ListingStore, ListingStream},
};
use crate::types::{
    extraction::ExtractionResult,
    listing::{CandidateFilter, CategoryReport, Listing, PurgeReport, ScalarFields, UpdateOutcome},
};

pub use crate::fetchers::MockFetcher;

/// A mock extractor returning canned results by URL.
///
/// URLs without a canned result extract as an empty result (a page where
/// no selector matched). URLs marked as failing return a transport error.
#[derive(Default, Clone)]
pub struct MockExtractor {
    results: Arc<RwLock<HashMap<String, ExtractionResult>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockExtractor {
    /// Create a new mock extractor with no canned results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a canned result for a URL.
    pub fn with_result(self, url: impl Into<String>, result: ExtractionResult) -> Self {
        self.results.write().unwrap().insert(url.into(), result);
        self
    }

    /// Make extraction of this URL fail as if the page timed out.
    pub fn fail_url(self, url: impl Into<String>) -> Self {
        self.failing.write().unwrap().insert(url.into());
        self
    }

    /// Get the URLs extracted, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    /// Clear all recorded calls.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, url: &str) -> FetchResult<ExtractionResult> {
        self.calls.write().unwrap().push(url.to_string());

        if self.failing.read().unwrap().contains(url) {
            return Err(FetchError::Timeout {
                url: url.to_string(),
            });
        }

        Ok(self
            .results
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Record of a write that reached a [`FaultyStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    UpsertScalars { key: String },
    ReconcileCategories { key: String, names: Vec<String> },
    Purge,
}

/// Wraps a store and injects failures.
///
/// - keys registered with [`fail_key`](Self::fail_key) reject writes with a
///   non-fatal query error
/// - names registered with [`fail_category`](Self::fail_category) are
///   reported as failed while the rest of the call goes through
/// - keys registered with [`unreadable_key`](Self::unreadable_key) come out
///   of candidate listing as decode errors
/// - after [`offline_after`](Self::offline_after) writes, every operation
///   fails with a connection error
pub struct FaultyStore<S> {
    inner: S,
    failing_keys: RwLock<HashSet<String>>,
    failing_categories: RwLock<HashSet<String>>,
    unreadable_keys: RwLock<HashSet<String>>,
    offline_after: Option<usize>,
    writes: AtomicUsize,
    offline: AtomicBool,
    calls: RwLock<Vec<StoreCall>>,
}

impl<S: ListingStore> FaultyStore<S> {
    /// Wrap a store without any faults.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_keys: RwLock::new(HashSet::new()),
            failing_categories: RwLock::new(HashSet::new()),
            unreadable_keys: RwLock::new(HashSet::new()),
            offline_after: None,
            writes: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Reject writes to this key.
    pub fn fail_key(self, key: impl ToString) -> Self {
        self.failing_keys.write().unwrap().insert(key.to_string());
        self
    }

    /// Reject this one category name wherever it is reconciled.
    pub fn fail_category(self, name: impl Into<String>) -> Self {
        self.failing_categories.write().unwrap().insert(name.into());
        self
    }

    /// Yield a decode error in place of this listing when listing candidates.
    pub fn unreadable_key(self, key: impl ToString) -> Self {
        self.unreadable_keys.write().unwrap().insert(key.to_string());
        self
    }

    /// Lose the connection once this many writes have been attempted.
    pub fn offline_after(mut self, writes: usize) -> Self {
        self.offline_after = Some(writes);
        self
    }

    /// Lose the connection now.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    /// Writes that reached this store, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().unwrap().clone()
    }

    /// Get the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store offline".into()));
        }
        Ok(())
    }

    fn before_write(&self, key: &S::Key, call: StoreCall) -> StoreResult<()> {
        self.check_online()?;

        let attempted = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.offline_after.is_some_and(|limit| attempted >= limit) {
            self.go_offline();
            return Err(StoreError::Connection("store offline".into()));
        }

        self.calls.write().unwrap().push(call);

        if self.failing_keys.read().unwrap().contains(&key.to_string()) {
            return Err(StoreError::Query(
                format!("write rejected for {}", key).into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ListingStore> ListingStore for FaultyStore<S> {
    type Key = S::Key;

    fn list_candidates(&self, filter: CandidateFilter) -> ListingStream<'_, Self::Key> {
        if let Err(e) = self.check_online() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let unreadable = self.unreadable_keys.read().unwrap().clone();
        self.inner
            .list_candidates(filter)
            .map(move |candidate| match candidate {
                Ok(listing) if unreadable.contains(&listing.key.to_string()) => Err(
                    StoreError::Decode(format!("corrupt listing {}", listing.key)),
                ),
                other => other,
            })
            .boxed()
    }

    async fn get_listing(&self, key: &Self::Key) -> StoreResult<Option<Listing<Self::Key>>> {
        self.check_online()?;
        self.inner.get_listing(key).await
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<Listing<Self::Key>>> {
        self.check_online()?;
        self.inner.find_by_url(url).await
    }

    async fn seed(&self, url: &str) -> StoreResult<Listing<Self::Key>> {
        self.check_online()?;
        self.inner.seed(url).await
    }

    async fn upsert_scalar_fields(
        &self,
        key: &Self::Key,
        fields: &ScalarFields,
    ) -> StoreResult<UpdateOutcome> {
        self.before_write(
            key,
            StoreCall::UpsertScalars {
                key: key.to_string(),
            },
        )?;
        self.inner.upsert_scalar_fields(key, fields).await
    }

    async fn reconcile_categories(
        &self,
        key: &Self::Key,
        names: &[String],
    ) -> StoreResult<CategoryReport> {
        self.before_write(
            key,
            StoreCall::ReconcileCategories {
                key: key.to_string(),
                names: names.to_vec(),
            },
        )?;

        let failing = self.failing_categories.read().unwrap().clone();
        let (rejected, accepted): (Vec<String>, Vec<String>) = names
            .iter()
            .cloned()
            .partition(|name| failing.contains(name));

        let mut report = self.inner.reconcile_categories(key, &accepted).await?;
        report.failed.extend(
            rejected
                .into_iter()
                .map(|name| (name, "category rejected".to_string())),
        );
        Ok(report)
    }

    async fn purge_incomplete(&self) -> StoreResult<PurgeReport> {
        self.check_online()?;
        self.calls.write().unwrap().push(StoreCall::Purge);
        self.inner.purge_incomplete().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}
