//! Maintenance sweep for listings that never got an expiry.

use tracing::info;

use crate::error::Result;
use crate::traits::store::ListingStore;
use crate::types::listing::PurgeReport;

/// Deletes incomplete listings along with the relation rows they own.
///
/// Idempotent: a second run right after the first removes nothing.
pub struct Pruner<S> {
    store: S,
}

impl<S: ListingStore> Pruner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self) -> Result<PurgeReport> {
        info!("Pruning listings without an expiry");
        let report = self.store.purge_incomplete().await?;
        info!(
            listings = report.listings_removed,
            links = report.links_removed,
            categories = report.categories_removed,
            "Prune complete"
        );
        Ok(report)
    }
}
