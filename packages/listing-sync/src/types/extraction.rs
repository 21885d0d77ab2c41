//! Extraction output and text normalization.

use serde::{Deserialize, Serialize};

/// Volatile attributes read from a listing's page.
///
/// Every field is independently optional: a field whose element is missing
/// from the page is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Expiration text (e.g. "3 days left at this price!")
    pub expiry: Option<String>,

    /// Discount text (e.g. "85% off")
    pub discount: Option<String>,

    /// Category labels, deduplicated, in page order
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ExtractionResult {
    /// Create an empty result (nothing found).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expiry text.
    pub fn with_expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = normalize_text(&expiry.into());
        self
    }

    /// Set the discount text.
    pub fn with_discount(mut self, discount: impl Into<String>) -> Self {
        self.discount = normalize_text(&discount.into());
        self
    }

    /// Set the category labels.
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.categories = normalize_categories(categories.into_iter().map(Into::into));
        self
    }

    /// True when no field was found on the page.
    pub fn is_empty(&self) -> bool {
        self.expiry.is_none() && self.discount.is_none() && self.categories.is_empty()
    }
}

/// Collapse runs of whitespace and trim. Blank text counts as absent.
pub fn normalize_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Normalize category labels, dropping blanks and repeats.
pub fn normalize_categories(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .filter_map(|label| normalize_text(&label))
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  3 days\n   left at this price! "),
            Some("3 days left at this price!".to_string())
        );
        assert_eq!(normalize_text(" \n\t "), None);
        assert_eq!(normalize_text(""), None);
    }

    #[test]
    fn test_normalize_categories_dedupes_in_order() {
        let labels = vec![
            " Development ".to_string(),
            "Python".to_string(),
            "".to_string(),
            "Development".to_string(),
        ];
        assert_eq!(normalize_categories(labels), vec!["Development", "Python"]);
    }

    #[test]
    fn test_builder_normalizes() {
        let result = ExtractionResult::new()
            .with_expiry("  ")
            .with_discount(" 85%  off ")
            .with_categories(["IT", "IT"]);

        assert_eq!(result.expiry, None);
        assert_eq!(result.discount.as_deref(), Some("85% off"));
        assert_eq!(result.categories, vec!["IT"]);
        assert!(!result.is_empty());
        assert!(ExtractionResult::new().is_empty());
    }

    proptest! {
        #[test]
        fn normalize_text_is_idempotent(raw in "\\PC*") {
            let once = normalize_text(&raw);
            let twice = once.as_deref().and_then(normalize_text);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn normalized_text_has_no_outer_whitespace(raw in "\\PC*") {
            if let Some(text) = normalize_text(&raw) {
                prop_assert_eq!(text.trim(), text.as_str());
                prop_assert!(!text.contains("  "));
            }
        }

        #[test]
        fn normalized_categories_are_unique(raw in proptest::collection::vec("[a-c ]{0,4}", 0..12)) {
            let labels = normalize_categories(raw);
            let unique: std::collections::HashSet<_> = labels.iter().collect();
            prop_assert_eq!(unique.len(), labels.len());
        }
    }
}
