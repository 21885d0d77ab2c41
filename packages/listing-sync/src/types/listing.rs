//! Listing records and the values passed to store writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A tracked course listing.
///
/// `K` is the backend's key: a surrogate id for the relational store, the
/// source URL for document stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing<K> {
    /// Store key
    pub key: K,

    /// Page the listing was discovered at. Unique and immutable.
    pub source_url: String,

    /// Expiration text as shown on the page. `None` until first determined,
    /// or when the page stops showing an expiry marker.
    pub expiry_status: Option<String>,

    /// Free-form discount text (e.g. "85% off")
    pub discount: Option<String>,

    /// Category labels
    #[serde(default)]
    pub categories: BTreeSet<String>,

    /// When a scalar or relation write last touched this listing
    pub last_updated: Option<DateTime<Utc>>,
}

impl<K> Listing<K> {
    /// Create an unpopulated listing, as left by upstream ingestion.
    pub fn new(key: K, source_url: impl Into<String>) -> Self {
        Self {
            key,
            source_url: source_url.into(),
            expiry_status: None,
            discount: None,
            categories: BTreeSet::new(),
            last_updated: None,
        }
    }

    /// Listings without an expiry have never been successfully checked and
    /// are subject to pruning.
    pub fn is_incomplete(&self) -> bool {
        self.expiry_status.is_none()
    }
}

/// Which listings a pass should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateFilter {
    /// Every listing
    #[default]
    All,
    /// Listings with a non-null expiry (category enrichment)
    HasExpiry,
    /// Listings with a null expiry (pruning candidates)
    MissingExpiry,
}

impl CandidateFilter {
    /// Check whether a listing belongs to this candidate set.
    pub fn matches<K>(&self, listing: &Listing<K>) -> bool {
        match self {
            CandidateFilter::All => true,
            CandidateFilter::HasExpiry => listing.expiry_status.is_some(),
            CandidateFilter::MissingExpiry => listing.expiry_status.is_none(),
        }
    }
}

/// Scalar attributes overwritten by the scalar pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarFields {
    pub expiry_status: Option<String>,
    pub discount: Option<String>,
}

impl ScalarFields {
    pub fn new(expiry_status: Option<String>, discount: Option<String>) -> Self {
        Self {
            expiry_status,
            discount,
        }
    }

    /// Whether applying these fields would change the listing.
    pub fn differs_from<K>(&self, listing: &Listing<K>) -> bool {
        self.expiry_status != listing.expiry_status || self.discount != listing.discount
    }
}

/// Result of a scalar upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// True if either field now holds a different value
    pub changed: bool,
}

/// Result of reconciling category candidates for one listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryReport {
    /// Relations created by this call
    pub added: usize,

    /// Candidates that were already linked
    pub already_present: usize,

    /// Candidates that could not be linked, with the reason
    pub failed: Vec<(String, String)>,
}

impl CategoryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of purging incomplete listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub listings_removed: u64,

    /// Junction rows removed along with the listings (relational only)
    pub links_removed: u64,

    /// Categories left without any listing by the purge (relational only)
    pub categories_removed: u64,
}

impl fmt::Display for PurgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} listings, {} category links, {} categories",
            self.listings_removed, self.links_removed, self.categories_removed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_filter() {
        let mut listing = Listing::new(1_i64, "https://example.com/course");
        assert!(CandidateFilter::All.matches(&listing));
        assert!(CandidateFilter::MissingExpiry.matches(&listing));
        assert!(!CandidateFilter::HasExpiry.matches(&listing));

        listing.expiry_status = Some("2 days left at this price!".into());
        assert!(CandidateFilter::HasExpiry.matches(&listing));
        assert!(!CandidateFilter::MissingExpiry.matches(&listing));
        assert!(!listing.is_incomplete());
    }

    #[test]
    fn test_scalar_fields_differ() {
        let listing = Listing::new("k", "https://example.com/course");
        assert!(!ScalarFields::default().differs_from(&listing));
        assert!(ScalarFields::new(None, Some("85% off".into())).differs_from(&listing));
    }
}
