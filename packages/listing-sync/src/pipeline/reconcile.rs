//! Reconciliation passes: extract each candidate's page and write the
//! result back through the store.

use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::traits::{extractor::Extractor, store::ListingStore};
use crate::types::listing::{CandidateFilter, Listing, ScalarFields};

/// Pause between listings unless configured otherwise.
pub const DEFAULT_PACING: Duration = Duration::from_secs(5);

/// Which reconciliation a pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    /// Overwrite expiry and discount on every listing
    Scalars,
    /// Add categories to listings that have an expiry
    Categories,
}

impl PassKind {
    /// Candidate set the pass visits.
    pub fn filter(self) -> CandidateFilter {
        match self {
            PassKind::Scalars => CandidateFilter::All,
            PassKind::Categories => CandidateFilter::HasExpiry,
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::Scalars => f.write_str("scalars"),
            PassKind::Categories => f.write_str("categories"),
        }
    }
}

/// A listing the pass could not (fully) reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedListing {
    pub source_url: String,
    pub reason: String,
}

impl FailedListing {
    pub fn new(source_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            reason: reason.into(),
        }
    }
}

/// Result of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub pass: PassKind,

    /// Listings visited
    pub processed: usize,

    /// Listings whose stored values changed
    pub updated: usize,

    /// Listings re-checked with nothing new to store
    pub unchanged: usize,

    /// Listings skipped or partially reconciled
    pub failed: Vec<FailedListing>,
}

impl PassReport {
    pub fn new(pass: PassKind) -> Self {
        Self {
            pass,
            processed: 0,
            updated: 0,
            unchanged: 0,
            failed: Vec::new(),
        }
    }

    /// Check if every listing was reconciled.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum ItemOutcome {
    Updated,
    Unchanged,
    /// Some category candidates were rejected
    Partial(String),
}

/// Drives extraction-then-write over a store's candidates.
///
/// Listings are handled one at a time in store order, with a fixed pause
/// after each one, unreadable rows included. A listing whose page cannot be loaded, or whose write is
/// rejected, is logged and skipped. A lost store connection ends the pass.
///
/// # Example
///
/// ```rust,ignore
/// use listing_sync::pipeline::Reconciler;
///
/// let reconciler = Reconciler::new(store, extractor).with_pacing(Duration::from_secs(5));
/// let report = reconciler.run_scalar_pass().await?;
/// ```
pub struct Reconciler<S, E> {
    store: S,
    extractor: E,
    pacing: Duration,
}

impl<S: ListingStore, E: Extractor> Reconciler<S, E> {
    pub fn new(store: S, extractor: E) -> Self {
        Self {
            store,
            extractor,
            pacing: DEFAULT_PACING,
        }
    }

    /// Set the pause taken after every listing.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Refresh expiry and discount on every listing.
    pub async fn run_scalar_pass(&self) -> Result<PassReport> {
        self.run(PassKind::Scalars).await
    }

    /// Add newly seen categories to every listing that has an expiry.
    pub async fn run_category_pass(&self) -> Result<PassReport> {
        self.run(PassKind::Categories).await
    }

    /// Run one pass to completion, or until the store is lost.
    pub async fn run(&self, pass: PassKind) -> Result<PassReport> {
        let mut report = PassReport::new(pass);
        info!(
            pass = %pass,
            extractor = self.extractor.name(),
            pacing_secs = self.pacing.as_secs_f64(),
            "Starting pass"
        );

        let mut candidates = self.store.list_candidates(pass.filter());
        while let Some(candidate) = candidates.next().await {
            let listing = match candidate {
                Ok(listing) => listing,
                Err(e) if e.is_fatal() => {
                    error!(pass = %pass, error = %e, processed = report.processed, "Store lost, aborting pass");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(pass = %pass, error = %e, "Skipping unreadable listing");
                    report.failed.push(FailedListing::new("(unreadable)", e.to_string()));
                    self.pace().await;
                    continue;
                }
            };

            report.processed += 1;
            match self.process(pass, &listing).await {
                Ok(ItemOutcome::Updated) => report.updated += 1,
                Ok(ItemOutcome::Unchanged) => report.unchanged += 1,
                Ok(ItemOutcome::Partial(reason)) => {
                    warn!(url = %listing.source_url, reason = %reason, "Some categories not linked");
                    report.failed.push(FailedListing::new(&listing.source_url, reason));
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        pass = %pass,
                        url = %listing.source_url,
                        error = %e,
                        processed = report.processed,
                        "Store lost, aborting pass"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(url = %listing.source_url, error = %e, "Failed to reconcile listing");
                    report.failed.push(FailedListing::new(&listing.source_url, e.to_string()));
                }
            }

            self.pace().await;
        }

        info!(
            pass = %pass,
            processed = report.processed,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "Pass complete"
        );
        Ok(report)
    }

    async fn pace(&self) {
        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
    }

    async fn process(&self, pass: PassKind, listing: &Listing<S::Key>) -> Result<ItemOutcome> {
        let extracted = self
            .extractor
            .extract(&listing.source_url)
            .await
            .map_err(SyncError::Fetch)?;

        match pass {
            PassKind::Scalars => {
                let fields = ScalarFields::new(extracted.expiry, extracted.discount);
                let outcome = self
                    .store
                    .upsert_scalar_fields(&listing.key, &fields)
                    .await?;

                info!(
                    url = %listing.source_url,
                    expiry = ?fields.expiry_status,
                    discount = ?fields.discount,
                    changed = outcome.changed,
                    "Listing re-checked"
                );
                Ok(if outcome.changed {
                    ItemOutcome::Updated
                } else {
                    ItemOutcome::Unchanged
                })
            }
            PassKind::Categories => {
                if extracted.categories.is_empty() {
                    debug!(url = %listing.source_url, "No categories on page");
                    return Ok(ItemOutcome::Unchanged);
                }

                let report = self
                    .store
                    .reconcile_categories(&listing.key, &extracted.categories)
                    .await?;

                info!(
                    url = %listing.source_url,
                    added = report.added,
                    already_present = report.already_present,
                    "Categories reconciled"
                );

                if !report.is_clean() {
                    let rejected = report
                        .failed
                        .iter()
                        .map(|(name, reason)| format!("{}: {}", name, reason))
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Ok(ItemOutcome::Partial(rejected));
                }

                Ok(if report.added > 0 {
                    ItemOutcome::Updated
                } else {
                    ItemOutcome::Unchanged
                })
            }
        }
    }
}
