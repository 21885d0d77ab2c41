//! Firecrawl-based page fetcher.
//!
//! Uses the Firecrawl API to render JavaScript-heavy listing pages and
//! returns the rendered DOM (`rawHtml`) for selector evaluation.
//!
//! Requires the `firecrawl` feature to be enabled.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{validate_url, PageFetcher, RenderedPage};

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

/// Renders pages through Firecrawl.
///
/// # Example
///
/// ```rust,ignore
/// use listing_sync::fetchers::FirecrawlFetcher;
///
/// let fetcher = FirecrawlFetcher::from_env()?;
/// let page = fetcher.fetch("https://www.udemy.com/course/rust/").await?;
/// ```
pub struct FirecrawlFetcher {
    client: Client,
    api_key: SecretString,
    api_url: String,
    /// Milliseconds Firecrawl waits after load before capturing the DOM
    wait_for_ms: Option<u64>,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'static str; 1],
    #[serde(rename = "waitFor", skip_serializing_if = "Option::is_none")]
    wait_for: Option<u64>,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeData {
    #[serde(rename = "rawHtml")]
    raw_html: Option<String>,
    metadata: Option<ScrapeMetadata>,
}

/// Status of the target page, as Firecrawl saw it
#[derive(Deserialize)]
struct ScrapeMetadata {
    #[serde(rename = "statusCode")]
    status_code: Option<u16>,
}

impl FirecrawlFetcher {
    /// Create a new Firecrawl fetcher with the given API key.
    pub fn new(api_key: impl Into<String>) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| FetchError::Http(Box::new(e)))?;

        let api_key: String = api_key.into();
        Ok(Self {
            client,
            api_key: SecretString::from(api_key),
            api_url: FIRECRAWL_API_URL.to_string(),
            wait_for_ms: None,
        })
    }

    /// Create from environment variable `FIRECRAWL_API_KEY`.
    pub fn from_env() -> FetchResult<Self> {
        let api_key = std::env::var("FIRECRAWL_API_KEY").map_err(|_| {
            FetchError::Http(Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "FIRECRAWL_API_KEY environment variable not set",
            )))
        })?;
        Self::new(api_key)
    }

    /// Point at a different API base (self-hosted Firecrawl).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Let scripts settle for this long before the DOM is captured.
    pub fn with_wait_for(mut self, wait: Duration) -> Self {
        self.wait_for_ms = Some(wait.as_millis() as u64);
        self
    }

    /// Replace the HTTP client (for a custom overall request timeout).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn scrape(&self, url: &str) -> FetchResult<RenderedPage> {
        let request = ScrapeRequest {
            url,
            formats: ["rawHtml"],
            wait_for: self.wait_for_ms,
        };

        let response = self
            .client
            .post(format!("{}/scrape", self.api_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    FetchError::Http(Box::new(e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Http(Box::new(e)))?;

        if !body.success {
            return Err(FetchError::Render {
                url: url.to_string(),
                reason: body
                    .error
                    .unwrap_or_else(|| "Firecrawl reported failure".to_string()),
            });
        }

        let data = body.data.ok_or_else(|| FetchError::Render {
            url: url.to_string(),
            reason: "response carried no data".to_string(),
        })?;
        let status = data
            .metadata
            .and_then(|m| m.status_code)
            .unwrap_or(200);
        if status >= 500 || status == 429 {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let html = data.raw_html.ok_or_else(|| FetchError::Render {
            url: url.to_string(),
            reason: "response carried no rawHtml".to_string(),
        })?;
        Ok(RenderedPage::new(url, html).with_status(status))
    }
}

#[async_trait]
impl PageFetcher for FirecrawlFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<RenderedPage> {
        validate_url(url)?;

        debug!(url = %url, "Firecrawl scrape starting");
        let page = self.scrape(url).await.map_err(|e| {
            warn!(url = %url, error = %e, "Firecrawl scrape failed");
            e
        })?;

        Ok(page.with_fetched_at(Utc::now()))
    }

    fn name(&self) -> &str {
        "firecrawl"
    }
}
