//! Course Listing Sync Library
//!
//! Keeps a catalog of time-limited course discount listings current by
//! re-visiting each listing's page, reading its volatile attributes
//! (expiry text, discount, category tags) and reconciling them into a
//! store.
//!
//! # Usage
//!
//! ```rust,ignore
//! use listing_sync::{HttpFetcher, Reconciler, RelationalStore, SelectorExtractor};
//!
//! let store = RelationalStore::new("sqlite://listings.db").await?;
//! let extractor = SelectorExtractor::new(HttpFetcher::new()?);
//! let reconciler = Reconciler::new(store, extractor);
//!
//! let scalars = reconciler.run_scalar_pass().await?;
//! let categories = reconciler.run_category_pass().await?;
//! reconciler.store().close().await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (ListingStore, Extractor, PageFetcher)
//! - [`types`] - Listing records and extraction output
//! - [`pipeline`] - Reconciler and Pruner passes
//! - [`stores`] - Storage implementations (relational, document, memory)
//! - [`fetchers`] - Page loading (HTTP, Firecrawl)
//! - [`extractors`] - CSS selector extraction
//! - [`config`] - Environment configuration for the binary
//! - [`testing`] - Mock implementations for testing

pub mod config;
pub mod error;
pub mod extractors;
pub mod fetchers;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{FetchError, Result, StoreError, SyncError};
pub use traits::{
    extractor::Extractor,
    fetcher::{PageFetcher, RenderedPage},
    store::{ListingStore, ListingStream},
};
pub use types::{
    extraction::ExtractionResult,
    listing::{
        CandidateFilter, CategoryReport, Listing, PurgeReport, ScalarFields, UpdateOutcome,
    },
};

// Re-export pipeline components
pub use pipeline::{FailedListing, PassKind, PassReport, Pruner, Reconciler};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::{DocumentStore, RelationalStore};

// Re-export fetchers and extractors
pub use extractors::{ExtractionSelectors, SelectorExtractor};
pub use fetchers::HttpFetcher;

#[cfg(feature = "firecrawl")]
pub use fetchers::FirecrawlFetcher;

// Re-export testing utilities
pub use testing::{FaultyStore, MockExtractor, MockFetcher};
