//! Core trait abstractions.
//!
//! These traits define the seams between page loading, attribute
//! extraction and listing storage.

pub mod extractor;
pub mod fetcher;
pub mod store;
