use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::extractors::{
    ExtractionSelectors, DEFAULT_CATEGORY_SELECTOR, DEFAULT_DISCOUNT_SELECTOR,
    DEFAULT_EXPIRY_SELECTOR,
};

/// Which store implementation a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Items, category types and a junction table
    #[default]
    Relational,
    /// One JSON document per listing
    Document,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" | "sql" => Ok(BackendKind::Relational),
            "document" | "doc" => Ok(BackendKind::Document),
            other => Err(format!(
                "unknown store backend '{}' (expected relational or document)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Relational => f.write_str("relational"),
            BackendKind::Document => f.write_str("document"),
        }
    }
}

/// How listing pages are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetcherKind {
    #[default]
    Http,
    Firecrawl,
}

impl FromStr for FetcherKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(FetcherKind::Http),
            "firecrawl" => Ok(FetcherKind::Firecrawl),
            other => Err(format!(
                "unknown fetcher '{}' (expected http or firecrawl)",
                other
            )),
        }
    }
}

/// Run configuration loaded from environment variables
#[derive(Debug)]
pub struct SyncConfig {
    pub database_url: String,
    pub backend: BackendKind,
    /// Pause after every listing
    pub pacing: Duration,
    pub page_timeout: Option<Duration>,
    pub fetcher: FetcherKind,
    pub firecrawl_api_key: Option<SecretString>,
    pub user_agent: Option<String>,
    pub expiry_selector: Option<String>,
    pub discount_selector: Option<String>,
    pub category_selector: Option<String>,
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match lookup("STORE_BACKEND") {
            Some(raw) => raw
                .parse::<BackendKind>()
                .map_err(anyhow::Error::msg)
                .context("STORE_BACKEND is invalid")?,
            None => BackendKind::default(),
        };

        let fetcher = match lookup("FETCHER") {
            Some(raw) => raw
                .parse::<FetcherKind>()
                .map_err(anyhow::Error::msg)
                .context("FETCHER is invalid")?,
            None => FetcherKind::default(),
        };

        let pacing_secs: u64 = lookup("PACING_SECS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("PACING_SECS must be a whole number of seconds")?;

        let page_timeout = lookup("PAGE_TIMEOUT_SECS")
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .context("PAGE_TIMEOUT_SECS must be a whole number of seconds")?
            .map(Duration::from_secs);

        let firecrawl_api_key = lookup("FIRECRAWL_API_KEY").map(SecretString::from);
        if fetcher == FetcherKind::Firecrawl && firecrawl_api_key.is_none() {
            bail!("FIRECRAWL_API_KEY must be set when FETCHER=firecrawl");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            backend,
            pacing: Duration::from_secs(pacing_secs),
            page_timeout,
            fetcher,
            firecrawl_api_key,
            user_agent: lookup("USER_AGENT"),
            expiry_selector: lookup("EXPIRY_SELECTOR"),
            discount_selector: lookup("DISCOUNT_SELECTOR"),
            category_selector: lookup("CATEGORY_SELECTOR"),
        })
    }

    /// Compile the configured selectors, falling back to the defaults.
    pub fn selectors(&self) -> Result<ExtractionSelectors> {
        let selectors = ExtractionSelectors::new(
            self.expiry_selector
                .as_deref()
                .unwrap_or(DEFAULT_EXPIRY_SELECTOR),
            self.discount_selector
                .as_deref()
                .unwrap_or(DEFAULT_DISCOUNT_SELECTOR),
            self.category_selector
                .as_deref()
                .unwrap_or(DEFAULT_CATEGORY_SELECTOR),
        )?;
        Ok(selectors)
    }
}
