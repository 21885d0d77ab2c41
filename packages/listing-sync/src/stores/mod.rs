//! Storage implementations for tracked listings.
//!
//! Available backends:
//! - `MemoryStore` - In-memory, document-shaped (always available)
//! - `RelationalStore` - SQLite tables with a category junction table
//!   (requires `sqlite` feature)
//! - `DocumentStore` - SQLite collection of JSON documents (requires
//!   `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod document;

#[cfg(feature = "sqlite")]
pub mod relational;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use document::DocumentStore;

#[cfg(feature = "sqlite")]
pub use relational::RelationalStore;

#[cfg(feature = "sqlite")]
pub(crate) use sqlite::{connect, connect_in_memory, parse_timestamp};

#[cfg(feature = "sqlite")]
mod sqlite {
    use chrono::{DateTime, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
    use std::str::FromStr;

    use crate::error::{StoreError, StoreResult};

    /// Open a file-backed pool, creating the database if missing.
    pub(crate) async fn connect(database_url: &str, max_connections: u32) -> StoreResult<SqlitePool> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(pool)
    }

    /// Open an in-memory pool.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the
    /// pool is pinned to a single connection that never expires.
    pub(crate) async fn connect_in_memory() -> StoreResult<SqlitePool> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(pool)
    }

    pub(crate) fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Decode(format!("Invalid date: {}", e)))
    }
}
