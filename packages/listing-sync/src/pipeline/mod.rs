//! Passes over the catalog.
//!
//! - [`Reconciler`] refreshes listings from their pages (scalar pass and
//!   category pass, run separately)
//! - [`Pruner`] deletes listings that never got an expiry

pub mod prune;
pub mod reconcile;

pub use prune::Pruner;
pub use reconcile::{FailedListing, PassKind, PassReport, Reconciler, DEFAULT_PACING};
