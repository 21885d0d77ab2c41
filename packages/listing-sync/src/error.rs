//! Typed errors for the sync library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell
//! per-listing failures apart from failures that must end a run.

use thiserror::Error;

/// Errors that can occur while running a pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Page could not be fetched
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether this error should end the current run.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_fatal(),
            SyncError::Fetch(_) => false,
            SyncError::Config(_) => true,
        }
    }
}

/// Errors raised while loading a listing's page.
///
/// A selector that matches nothing is not an error; these only cover the
/// page itself being unavailable.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is empty or not absolute
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Server failed or throttled the request (5xx, 429)
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Page did not finish loading in time
    #[error("timeout loading: {url}")]
    Timeout { url: String },

    /// Rendering service rejected or failed the request
    #[error("render failed for {url}: {reason}")]
    Render { url: String, reason: String },
}

/// Errors raised by a [`ListingStore`](crate::traits::store::ListingStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached at all
    #[error("store connection lost: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A single statement was rejected
    #[error("query failed: {0}")]
    Query(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No listing under this key
    #[error("listing not found: {key}")]
    NotFound { key: String },

    /// Stored data could not be decoded
    #[error("invalid stored data: {0}")]
    Decode(String),

    /// Optimistic update kept losing to concurrent writers
    #[error("write conflict on {key} after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
}

impl StoreError {
    /// Connectivity failures end the batch, everything else is per-listing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    pub(crate) fn not_found(key: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            key: key.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(Box::new(e)),
            other => StoreError::Query(Box::new(other)),
        }
    }
}

/// Result type alias for pass operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_fatal() {
        let conn = StoreError::Connection("socket closed".into());
        assert!(conn.is_fatal());
        assert!(SyncError::from(conn).is_fatal());

        assert!(!StoreError::not_found(7).is_fatal());
        assert!(!StoreError::Decode("bad json".into()).is_fatal());

        let fetch = SyncError::from(FetchError::Timeout {
            url: "https://example.com".into(),
        });
        assert!(!fetch.is_fatal());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlx_errors_are_classified() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_fatal());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_fatal());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_fatal());
    }
}
