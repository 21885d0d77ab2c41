//! Extractor implementations.
//!
//! - `SelectorExtractor` - CSS selectors over a page from any `PageFetcher`
//! - `MockExtractor` (in `testing`) - canned results for pipeline tests

mod selector;

pub use selector::{
    ExtractionSelectors, SelectorExtractor, DEFAULT_CATEGORY_SELECTOR, DEFAULT_DISCOUNT_SELECTOR,
    DEFAULT_EXPIRY_SELECTOR,
};

pub use crate::traits::extractor::Extractor;
