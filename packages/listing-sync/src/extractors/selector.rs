//! CSS-selector extraction over a fetched page.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

use crate::error::{FetchError, FetchResult, Result, SyncError};
use crate::traits::extractor::Extractor;
use crate::traits::fetcher::{validate_url, PageFetcher};
use crate::types::extraction::{normalize_categories, normalize_text, ExtractionResult};

/// Udemy course page: "N days left at this price!"
pub const DEFAULT_EXPIRY_SELECTOR: &str = r#"span.ud-text-sm[data-purpose="safely-set-inner-html:discount-expiration:expiration-text"]"#;

/// Udemy course page: "85% off"
pub const DEFAULT_DISCOUNT_SELECTOR: &str =
    "div.base-price-text-module--price-part---xQlz.ud-clp-percent-discount.ud-text-sm span:last-child";

/// Udemy course page: topic pills
pub const DEFAULT_CATEGORY_SELECTOR: &str =
    "ul.ud-unstyled-list.pill-group-module--pill-group--q7hFg li a span.ud-btn-label";

/// The three compiled selectors an extraction evaluates.
#[derive(Debug, Clone)]
pub struct ExtractionSelectors {
    expiry: Selector,
    discount: Selector,
    categories: Selector,
}

impl ExtractionSelectors {
    /// Compile custom selectors. Fails on invalid CSS.
    pub fn new(expiry: &str, discount: &str, categories: &str) -> Result<Self> {
        Ok(Self {
            expiry: compile("expiry", expiry)?,
            discount: compile("discount", discount)?,
            categories: compile("categories", categories)?,
        })
    }
}

impl Default for ExtractionSelectors {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXPIRY_SELECTOR,
            DEFAULT_DISCOUNT_SELECTOR,
            DEFAULT_CATEGORY_SELECTOR,
        )
        .unwrap_or_else(|e| unreachable!("built-in selector failed to compile: {e}"))
    }
}

fn compile(field: &str, css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| SyncError::Config(format!("invalid {} selector {:?}: {}", field, css, e)))
}

/// Extracts listing attributes by evaluating CSS selectors on a page
/// loaded through a [`PageFetcher`].
///
/// # Example
///
/// ```rust,ignore
/// use listing_sync::extractors::SelectorExtractor;
/// use listing_sync::fetchers::HttpFetcher;
///
/// let extractor = SelectorExtractor::new(HttpFetcher::new()?)
///     .with_timeout(Duration::from_secs(90));
/// let result = extractor.extract("https://www.udemy.com/course/rust/").await?;
/// ```
pub struct SelectorExtractor<F> {
    fetcher: F,
    selectors: ExtractionSelectors,
    timeout: Option<Duration>,
}

impl<F: PageFetcher> SelectorExtractor<F> {
    /// Create an extractor using the default selectors.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            selectors: ExtractionSelectors::default(),
            timeout: None,
        }
    }

    /// Use custom selectors.
    pub fn with_selectors(mut self, selectors: ExtractionSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Fail a page load that takes longer than this.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the underlying fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Evaluate the selectors against already-loaded HTML.
    pub fn read_html(&self, url: &str, html: &str) -> ExtractionResult {
        let document = Html::parse_document(html);

        let first_text = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .and_then(|el| normalize_text(&el.text().collect::<String>()))
        };

        let expiry = first_text(&self.selectors.expiry);
        let discount = first_text(&self.selectors.discount);
        let categories = normalize_categories(
            document
                .select(&self.selectors.categories)
                .map(|el| el.text().collect::<String>()),
        );

        if expiry.is_none() {
            debug!(url = %url, field = "expiry", "Selector matched nothing");
        }
        if discount.is_none() {
            debug!(url = %url, field = "discount", "Selector matched nothing");
        }
        if categories.is_empty() {
            debug!(url = %url, field = "categories", "Selector matched nothing");
        }

        ExtractionResult {
            expiry,
            discount,
            categories,
        }
    }
}

#[async_trait]
impl<F: PageFetcher> Extractor for SelectorExtractor<F> {
    async fn extract(&self, url: &str) -> FetchResult<ExtractionResult> {
        validate_url(url)?;

        let page = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch(url))
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                })??,
            None => self.fetcher.fetch(url).await?,
        };
        if page.is_missing() {
            debug!(url = %url, status = page.status, "Listing page is gone");
        }

        Ok(self.read_html(url, &page.html))
    }

    fn name(&self) -> &str {
        self.fetcher.name()
    }
}
