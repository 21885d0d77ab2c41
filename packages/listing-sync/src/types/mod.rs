//! Data types shared by extractors, stores and the pipeline.

pub mod extraction;
pub mod listing;
