//! Document storage implementation.
//!
//! Listings live as JSON documents in a single collection keyed by source
//! URL, with categories embedded as an array:
//!
//! ```json
//! {
//!   "url": "https://www.udemy.com/course/rust/",
//!   "expiryStatus": "3 days left at this price!",
//!   "discount": "85% off",
//!   "categories": ["Development", "Programming Languages"],
//!   "lastUpdated": "2024-05-01T12:00:00Z"
//! }
//! ```
//!
//! Every mutation is a single atomic document replacement guarded by a
//! revision counter, so concurrent writers never lose each other's
//! categories.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::stores::{connect, connect_in_memory};
use crate::traits::store::{category_candidates, ListingStore, ListingStream};
use crate::types::listing::{
    CandidateFilter, CategoryReport, Listing, PurgeReport, ScalarFields, UpdateOutcome,
};

/// Documents fetched per round trip when listing candidates.
const DEFAULT_PAGE_SIZE: i64 = 100;

/// Attempts before giving up on a contended document.
const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Document collection backed by SQLite's JSON support.
pub struct DocumentStore {
    pool: SqlitePool,
    page_size: i64,
}

/// Stored document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingDocument {
    url: String,
    expiry_status: Option<String>,
    discount: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    last_updated: Option<DateTime<Utc>>,
}

impl ListingDocument {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            expiry_status: None,
            discount: None,
            categories: Vec::new(),
            last_updated: None,
        }
    }

    fn into_listing(self) -> Listing<String> {
        Listing {
            key: self.url.clone(),
            source_url: self.url,
            expiry_status: self.expiry_status,
            discount: self.discount,
            categories: self.categories.into_iter().collect(),
            last_updated: self.last_updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    url: String,
    revision: i64,
    doc: String,
}

impl DocumentRow {
    fn decode(&self) -> StoreResult<ListingDocument> {
        serde_json::from_str(&self.doc)
            .map_err(|e| StoreError::Decode(format!("Invalid document for {}: {}", self.url, e)))
    }

    fn into_listing(self) -> StoreResult<Listing<String>> {
        Ok(self.decode()?.into_listing())
    }
}

fn filter_clause(filter: CandidateFilter) -> &'static str {
    match filter {
        CandidateFilter::All => "",
        CandidateFilter::HasExpiry => "AND json_extract(doc, '$.expiryStatus') IS NOT NULL",
        CandidateFilter::MissingExpiry => "AND json_extract(doc, '$.expiryStatus') IS NULL",
    }
}

impl DocumentStore {
    /// Create a new store with the given connection URL, creating the
    /// database file and collection if needed.
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::with_pool(connect(database_url, 5).await?).await
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        Self::with_pool(connect_in_memory().await?).await
    }

    /// Wrap an existing pool, creating the collection.
    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Set how many documents are loaded per page when streaming.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1) as i64;
        self
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listing_documents (
                url TEXT PRIMARY KEY,
                revision INTEGER NOT NULL DEFAULT 0,
                doc TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE INDEX IF NOT EXISTS idx_listing_documents_expiry
                ON listing_documents(json_extract(doc, '$.expiryStatus'));
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_row(&self, url: &str) -> StoreResult<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT url, revision, doc FROM listing_documents WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Read-modify-write a document with an optimistic revision check.
    ///
    /// `apply` returns its outcome and whether the document needs writing.
    /// It runs again from a fresh read if another writer got in first.
    async fn modify<T, F>(&self, url: &str, mut apply: F) -> StoreResult<T>
    where
        F: FnMut(&mut ListingDocument) -> (T, bool) + Send,
        T: Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let row = self
                .fetch_row(url)
                .await?
                .ok_or_else(|| StoreError::not_found(url))?;

            let mut doc = row.decode()?;
            let (outcome, dirty) = apply(&mut doc);
            if !dirty {
                return Ok(outcome);
            }

            let body = serde_json::to_string(&doc)
                .map_err(|e| StoreError::Decode(format!("Cannot encode document: {}", e)))?;

            let result = sqlx::query(
                "UPDATE listing_documents SET doc = ?, revision = revision + 1 WHERE url = ? AND revision = ?",
            )
            .bind(&body)
            .bind(url)
            .bind(row.revision)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(outcome);
            }

            debug!(url = %url, attempt, "Document changed during update, retrying");
        }

        Err(StoreError::Conflict {
            key: url.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }
}

#[async_trait]
impl ListingStore for DocumentStore {
    type Key = String;

    fn list_candidates(&self, filter: CandidateFilter) -> ListingStream<'_, String> {
        let query = format!(
            "SELECT url, revision, doc FROM listing_documents WHERE url > ? {} ORDER BY url LIMIT ?",
            filter_clause(filter)
        );
        let page_size = self.page_size;

        // Keyset pagination: one page in memory, and no connection held
        // while the consumer works through it.
        Box::pin(stream! {
            let mut after = String::new();
            loop {
                let rows = match sqlx::query_as::<_, DocumentRow>(&query)
                    .bind(&after)
                    .bind(page_size)
                    .fetch_all(&self.pool)
                    .await
                {
                    Ok(rows) => rows,
                    Err(e) => {
                        yield Err(StoreError::from(e));
                        break;
                    }
                };

                let exhausted = (rows.len() as i64) < page_size;
                if let Some(last) = rows.last() {
                    after = last.url.clone();
                }

                for row in rows {
                    yield row.into_listing();
                }

                if exhausted {
                    break;
                }
            }
        })
    }

    async fn get_listing(&self, key: &String) -> StoreResult<Option<Listing<String>>> {
        self.find_by_url(key).await
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<Listing<String>>> {
        self.fetch_row(url)
            .await?
            .map(DocumentRow::into_listing)
            .transpose()
    }

    async fn seed(&self, url: &str) -> StoreResult<Listing<String>> {
        let body = serde_json::to_string(&ListingDocument::new(url))
            .map_err(|e| StoreError::Decode(format!("Cannot encode document: {}", e)))?;

        sqlx::query("INSERT INTO listing_documents (url, doc) VALUES (?, ?) ON CONFLICT(url) DO NOTHING")
            .bind(url)
            .bind(&body)
            .execute(&self.pool)
            .await?;

        self.find_by_url(url)
            .await?
            .ok_or_else(|| StoreError::not_found(url))
    }

    async fn upsert_scalar_fields(
        &self,
        key: &String,
        fields: &ScalarFields,
    ) -> StoreResult<UpdateOutcome> {
        self.modify(key, |doc| {
            let changed =
                doc.expiry_status != fields.expiry_status || doc.discount != fields.discount;
            doc.expiry_status = fields.expiry_status.clone();
            doc.discount = fields.discount.clone();
            doc.last_updated = Some(Utc::now());
            (UpdateOutcome { changed }, true)
        })
        .await
    }

    async fn reconcile_categories(
        &self,
        key: &String,
        names: &[String],
    ) -> StoreResult<CategoryReport> {
        let candidates = category_candidates(names);

        self.modify(key, |doc| {
            let mut report = CategoryReport::default();
            for name in &candidates {
                if doc.categories.contains(name) {
                    report.already_present += 1;
                } else {
                    doc.categories.push(name.clone());
                    report.added += 1;
                }
            }

            let dirty = report.added > 0;
            if dirty {
                doc.last_updated = Some(Utc::now());
            }
            (report, dirty)
        })
        .await
    }

    async fn purge_incomplete(&self) -> StoreResult<PurgeReport> {
        let listings_removed = sqlx::query(
            "DELETE FROM listing_documents WHERE json_extract(doc, '$.expiryStatus') IS NULL",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let report = PurgeReport {
            listings_removed,
            ..Default::default()
        };
        info!(%report, "Purged incomplete listings");
        Ok(report)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
