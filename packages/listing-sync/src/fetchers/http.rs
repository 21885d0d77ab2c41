//! HTTP-based page fetcher.
//!
//! Plain GET requests with browser-like headers. Pages that only fill in
//! their content with JavaScript need `FirecrawlFetcher` instead.
//!
//! Client errors such as 404 and 410 still yield a page, so a removed
//! listing extracts to absent fields. Server errors and 429 mean "try
//! later" and fail the fetch.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{validate_url, PageFetcher, RenderedPage};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fetches pages over HTTP.
///
/// # Example
///
/// ```rust,ignore
/// use listing_sync::fetchers::HttpFetcher;
///
/// let fetcher = HttpFetcher::new()?.with_timeout(Duration::from_secs(60));
/// let page = fetcher.fetch("https://www.udemy.com/course/rust/").await?;
/// ```
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher with default settings (no timeout).
    pub fn new() -> FetchResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Http(Box::new(e)))?;

        Ok(Self::with_client(client))
    }

    /// Use a custom HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: None,
        }
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Give up on a page after this long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn map_error(url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Http(Box::new(e))
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<RenderedPage> {
        validate_url(url)?;

        debug!(url = %url, "HTTP fetch starting");
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            Self::map_error(url, e)
        })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(url = %url, status = status.as_u16(), "Server refused page");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Page served with error status");
        }

        let html = response
            .text()
            .await
            .map_err(|e| Self::map_error(url, e))?;

        Ok(RenderedPage::new(url, html)
            .with_status(status.as_u16())
            .with_fetched_at(Utc::now()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection on a local port.
    async fn serve(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/course/removed/", addr)
    }

    #[tokio::test]
    async fn test_not_found_page_is_returned() {
        let url = serve("404 Not Found", "<html><body>Page not found</body></html>").await;
        let fetcher = HttpFetcher::new().unwrap();

        let page = fetcher.fetch(&url).await.unwrap();
        assert_eq!(page.status, 404);
        assert!(page.is_missing());
        assert!(page.html.contains("Page not found"));
    }

    #[tokio::test]
    async fn test_server_error_fails_fetch() {
        let url = serve("503 Service Unavailable", "busy").await;
        let fetcher = HttpFetcher::new().unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_throttled_fails_fetch() {
        let url = serve("429 Too Many Requests", "slow down").await;
        let fetcher = HttpFetcher::new().unwrap();

        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 429, .. }));
    }

    #[test]
    fn test_builder() {
        let fetcher = HttpFetcher::new()
            .unwrap()
            .with_user_agent("listing-sync/test")
            .with_timeout(Duration::from_secs(10));

        assert_eq!(fetcher.user_agent, "listing-sync/test");
        assert_eq!(fetcher.timeout, Some(Duration::from_secs(10)));
        assert_eq!(fetcher.name(), "http");
    }

    #[tokio::test]
    async fn test_rejects_invalid_url_without_request() {
        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher.fetch("").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
