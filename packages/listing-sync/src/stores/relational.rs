//! Relational storage implementation.
//!
//! Categories are normalized: one row per distinct name in
//! `category_types`, and one row per listing/category pair in
//! `item_category_links`. Both carry UNIQUE constraints, which is what keeps
//! concurrent reconciliations from creating duplicates.

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::FromRow;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::stores::{connect, connect_in_memory, parse_timestamp};
use crate::traits::store::{category_candidates, ListingStore, ListingStream};
use crate::types::listing::{
    CandidateFilter, CategoryReport, Listing, PurgeReport, ScalarFields, UpdateOutcome,
};

const SELECT_ITEMS: &str = r#"
    SELECT
        i.id,
        i.url,
        i.expiry_status,
        i.discount,
        i.last_updated,
        (
            SELECT json_group_array(t.type_name)
            FROM item_category_links l
            JOIN category_types t ON t.type_id = l.type_id
            WHERE l.item_id = i.id
        ) AS categories
    FROM items i
"#;

/// SQLite-backed relational listing store.
pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    /// Create a new store with the given connection URL, creating the
    /// database file and schema if needed.
    ///
    /// # Example URLs
    /// - `sqlite://listings.db` - File-based database
    /// - `sqlite::memory:` - Use [`RelationalStore::in_memory`] instead
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::with_pool(connect(database_url, 5).await?).await
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        Self::with_pool(connect_in_memory().await?).await
    }

    /// Wrap an existing pool, running migrations.
    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                expiry_status TEXT,
                discount TEXT,
                last_updated TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_items_expiry_status ON items(expiry_status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS category_types (
                type_id INTEGER PRIMARY KEY AUTOINCREMENT,
                type_name TEXT NOT NULL UNIQUE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_category_links (
                item_id INTEGER NOT NULL REFERENCES items(id),
                type_id INTEGER NOT NULL REFERENCES category_types(type_id),
                UNIQUE (item_id, type_id)
            );

            CREATE INDEX IF NOT EXISTS idx_item_category_links_type_id
                ON item_category_links(type_id);
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

    /// Number of junction rows for a listing.
    pub async fn link_count(&self, item_id: i64) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM item_category_links WHERE item_id = ?")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Number of distinct categories defined.
    pub async fn category_count(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM category_types")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn item_exists(&self, item_id: i64) -> StoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Look up a category by name, creating it if absent.
    ///
    /// The insert defers to the UNIQUE constraint on `type_name`, so a
    /// concurrent writer creating the same name makes this a lookup.
    async fn category_id(conn: &mut SqliteConnection, name: &str) -> StoreResult<i64> {
        let created = sqlx::query(
            "INSERT INTO category_types (type_name) VALUES (?) ON CONFLICT(type_name) DO NOTHING",
        )
        .bind(name)
        .execute(&mut *conn)
        .await?;

        let (type_id,): (i64,) =
            sqlx::query_as("SELECT type_id FROM category_types WHERE type_name = ?")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;

        if created.rows_affected() == 1 {
            debug!(category = %name, type_id, "Created category");
        }
        Ok(type_id)
    }

    /// Link a listing to a category. Returns false if the link existed.
    ///
    /// Category creation and the link commit together; a rejected link
    /// leaves no new category behind.
    async fn link_category(&self, item_id: i64, name: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let type_id = Self::category_id(&mut *tx, name).await?;

        let result = sqlx::query(
            "INSERT INTO item_category_links (item_id, type_id) VALUES (?, ?) ON CONFLICT(item_id, type_id) DO NOTHING",
        )
        .bind(item_id)
        .bind(type_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct ItemRow {
    id: i64,
    url: String,
    expiry_status: Option<String>,
    discount: Option<String>,
    last_updated: Option<String>,
    categories: String,
}

impl ItemRow {
    fn into_listing(self) -> StoreResult<Listing<i64>> {
        let categories: Vec<String> = serde_json::from_str(&self.categories)
            .map_err(|e| StoreError::Decode(format!("Invalid categories JSON: {}", e)))?;

        Ok(Listing {
            key: self.id,
            source_url: self.url,
            expiry_status: self.expiry_status,
            discount: self.discount,
            categories: categories.into_iter().collect(),
            last_updated: self.last_updated.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn filter_clause(filter: CandidateFilter) -> &'static str {
    match filter {
        CandidateFilter::All => "",
        CandidateFilter::HasExpiry => "WHERE i.expiry_status IS NOT NULL",
        CandidateFilter::MissingExpiry => "WHERE i.expiry_status IS NULL",
    }
}

#[async_trait]
impl ListingStore for RelationalStore {
    type Key = i64;

    fn list_candidates(&self, filter: CandidateFilter) -> ListingStream<'_, i64> {
        let query = format!("{} {} ORDER BY i.id", SELECT_ITEMS, filter_clause(filter));

        // Hundreds to thousands of rows; loading them up front keeps the
        // connection free for the writes made while the stream is consumed.
        Box::pin(stream! {
            match sqlx::query_as::<_, ItemRow>(&query).fetch_all(&self.pool).await {
                Ok(rows) => {
                    for row in rows {
                        yield row.into_listing();
                    }
                }
                Err(e) => yield Err(StoreError::from(e)),
            }
        })
    }

    async fn get_listing(&self, key: &i64) -> StoreResult<Option<Listing<i64>>> {
        let query = format!("{} WHERE i.id = ?", SELECT_ITEMS);
        let row = sqlx::query_as::<_, ItemRow>(&query)
            .bind(*key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ItemRow::into_listing).transpose()
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Option<Listing<i64>>> {
        let query = format!("{} WHERE i.url = ?", SELECT_ITEMS);
        let row = sqlx::query_as::<_, ItemRow>(&query)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ItemRow::into_listing).transpose()
    }

    async fn seed(&self, url: &str) -> StoreResult<Listing<i64>> {
        sqlx::query("INSERT INTO items (url) VALUES (?) ON CONFLICT(url) DO NOTHING")
            .bind(url)
            .execute(&self.pool)
            .await?;

        self.find_by_url(url)
            .await?
            .ok_or_else(|| StoreError::not_found(url))
    }

    async fn upsert_scalar_fields(
        &self,
        key: &i64,
        fields: &ScalarFields,
    ) -> StoreResult<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT expiry_status, discount FROM items WHERE id = ?")
                .bind(*key)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((expiry_status, discount)) = current else {
            return Err(StoreError::not_found(key));
        };
        let changed = expiry_status != fields.expiry_status || discount != fields.discount;

        sqlx::query("UPDATE items SET expiry_status = ?, discount = ?, last_updated = ? WHERE id = ?")
            .bind(&fields.expiry_status)
            .bind(&fields.discount)
            .bind(Utc::now().to_rfc3339())
            .bind(*key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(UpdateOutcome { changed })
    }

    async fn reconcile_categories(
        &self,
        key: &i64,
        names: &[String],
    ) -> StoreResult<CategoryReport> {
        if !self.item_exists(*key).await? {
            return Err(StoreError::not_found(key));
        }

        let mut report = CategoryReport::default();
        for name in category_candidates(names) {
            match self.link_category(*key, &name).await {
                Ok(true) => report.added += 1,
                Ok(false) => report.already_present += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(item_id = key, category = %name, error = %e, "Failed to link category");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if report.added > 0 {
            sqlx::query("UPDATE items SET last_updated = ? WHERE id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(*key)
                .execute(&self.pool)
                .await?;
        }

        Ok(report)
    }

    async fn purge_incomplete(&self) -> StoreResult<PurgeReport> {
        // Junction rows first, then categories they orphan, then the items.
        // One transaction: a failure part way leaves everything in place.
        let mut tx = self.pool.begin().await?;

        let affected_types: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT l.type_id
            FROM item_category_links l
            JOIN items i ON i.id = l.item_id
            WHERE i.expiry_status IS NULL
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let links_removed = sqlx::query(
            "DELETE FROM item_category_links WHERE item_id IN (SELECT id FROM items WHERE expiry_status IS NULL)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut categories_removed = 0;
        for (type_id,) in affected_types {
            categories_removed += sqlx::query(
                r#"
                DELETE FROM category_types
                WHERE type_id = ?
                  AND NOT EXISTS (SELECT 1 FROM item_category_links WHERE type_id = ?)
                "#,
            )
            .bind(type_id)
            .bind(type_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        let listings_removed = sqlx::query("DELETE FROM items WHERE expiry_status IS NULL")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let report = PurgeReport {
            listings_removed,
            links_removed,
            categories_removed,
        };
        info!(%report, "Purged incomplete listings");
        Ok(report)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn test_store() -> RelationalStore {
        RelationalStore::in_memory().await.unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn set_expiry(store: &RelationalStore, id: i64, expiry: Option<&str>) {
        store
            .upsert_scalar_fields(&id, &ScalarFields::new(expiry.map(String::from), None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_seed_keeps_urls_unique() {
        let store = test_store().await;
        let first = store.seed("https://x/1").await.unwrap();
        let again = store.seed("https://x/1").await.unwrap();
        let other = store.seed("https://x/2").await.unwrap();

        assert_eq!(first.key, again.key);
        assert_ne!(first.key, other.key);
        assert!(first.last_updated.is_none());
        assert!(first.categories.is_empty());
    }

    #[tokio::test]
    async fn test_scalar_upsert() {
        let store = test_store().await;
        let listing = store.seed("https://x/1").await.unwrap();

        let outcome = store
            .upsert_scalar_fields(
                &listing.key,
                &ScalarFields::new(Some("3 days left".into()), Some("85% off".into())),
            )
            .await
            .unwrap();
        assert!(outcome.changed);

        let outcome = store
            .upsert_scalar_fields(
                &listing.key,
                &ScalarFields::new(Some("3 days left".into()), Some("85% off".into())),
            )
            .await
            .unwrap();
        assert!(!outcome.changed);

        let stored = store.get_listing(&listing.key).await.unwrap().unwrap();
        assert_eq!(stored.expiry_status.as_deref(), Some("3 days left"));
        assert_eq!(stored.discount.as_deref(), Some("85% off"));
    }

    #[tokio::test]
    async fn test_null_scalar_upsert_touches_timestamp() {
        let store = test_store().await;
        let listing = store.seed("https://x/1").await.unwrap();

        store
            .upsert_scalar_fields(&listing.key, &ScalarFields::default())
            .await
            .unwrap();

        let stored = store.get_listing(&listing.key).await.unwrap().unwrap();
        assert!(stored.expiry_status.is_none());
        assert!(stored.discount.is_none());
        assert!(stored.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_upsert_unknown_key() {
        let store = test_store().await;
        let err = store
            .upsert_scalar_fields(&42, &ScalarFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_reconcile_categories_is_idempotent() {
        let store = test_store().await;
        let listing = store.seed("https://x/1").await.unwrap();

        let first = store
            .reconcile_categories(&listing.key, &names(&["A", "B"]))
            .await
            .unwrap();
        assert_eq!(first.added, 2);

        let second = store
            .reconcile_categories(&listing.key, &names(&["A", "B"]))
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.already_present, 2);

        assert_eq!(store.link_count(listing.key).await.unwrap(), 2);
        assert_eq!(store.category_count().await.unwrap(), 2);

        let stored = store.get_listing(&listing.key).await.unwrap().unwrap();
        let categories: Vec<_> = stored.categories.into_iter().collect();
        assert_eq!(categories, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_existing_category_is_linked_not_duplicated() {
        let store = test_store().await;
        let a = store.seed("https://x/1").await.unwrap();
        let b = store.seed("https://x/2").await.unwrap();

        store
            .reconcile_categories(&a.key, &names(&["Python"]))
            .await
            .unwrap();
        let report = store
            .reconcile_categories(&b.key, &names(&["Python"]))
            .await
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(store.category_count().await.unwrap(), 1);
        assert_eq!(store.link_count(b.key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reconcile_creates_one_relation() {
        let store = test_store().await;
        let listing = store.seed("https://x/1").await.unwrap();
        let candidates = names(&["Development"]);

        let (first, second) = tokio::join!(
            store.reconcile_categories(&listing.key, &candidates),
            store.reconcile_categories(&listing.key, &candidates),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.added + second.added, 1);
        assert!(first.is_clean() && second.is_clean());
        assert_eq!(store.link_count(listing.key).await.unwrap(), 1);
        assert_eq!(store.category_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_unknown_listing() {
        let store = test_store().await;
        let err = store
            .reconcile_categories(&7, &names(&["A"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.category_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_candidate_filters() {
        let store = test_store().await;
        let a = store.seed("https://x/1").await.unwrap();
        store.seed("https://x/2").await.unwrap();
        set_expiry(&store, a.key, Some("expired")).await;

        let all: Vec<_> = store
            .list_candidates(CandidateFilter::All)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let with_expiry: Vec<_> = store
            .list_candidates(CandidateFilter::HasExpiry)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(with_expiry.len(), 1);
        assert_eq!(with_expiry[0].key, a.key);

        let missing: Vec<_> = store
            .list_candidates(CandidateFilter::MissingExpiry)
            .try_collect()
            .await
            .unwrap();
        assert!(missing.iter().all(|l| l.expiry_status.is_none()));
        assert_eq!(missing.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_cascades_through_links() {
        let store = test_store().await;
        let kept = store.seed("https://x/1").await.unwrap();
        let doomed = store.seed("https://x/2").await.unwrap();
        let also_doomed = store.seed("https://x/3").await.unwrap();
        set_expiry(&store, kept.key, Some("expired")).await;

        store
            .reconcile_categories(&kept.key, &names(&["Python"]))
            .await
            .unwrap();
        store
            .reconcile_categories(&doomed.key, &names(&["Python", "Go"]))
            .await
            .unwrap();

        let report = store.purge_incomplete().await.unwrap();
        assert_eq!(report.listings_removed, 2);
        assert_eq!(report.links_removed, 2);
        assert_eq!(report.categories_removed, 1);

        assert!(store.get_listing(&doomed.key).await.unwrap().is_none());
        assert!(store.get_listing(&also_doomed.key).await.unwrap().is_none());

        let survivor = store.get_listing(&kept.key).await.unwrap().unwrap();
        assert!(survivor.categories.contains("Python"));
        assert_eq!(store.category_count().await.unwrap(), 1);

        let again = store.purge_incomplete().await.unwrap();
        assert_eq!(again, PurgeReport::default());
    }

    #[tokio::test]
    async fn test_purge_keeps_unrelated_categories() {
        let store = test_store().await;
        let kept = store.seed("https://x/1").await.unwrap();
        set_expiry(&store, kept.key, Some("1 day left")).await;
        store
            .reconcile_categories(&kept.key, &names(&["Design"]))
            .await
            .unwrap();

        let report = store.purge_incomplete().await.unwrap();
        assert_eq!(report.listings_removed, 0);
        assert_eq!(report.categories_removed, 0);
        assert_eq!(store.link_count(kept.key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_category_spares_the_others() {
        let store = test_store().await;
        let listing = store.seed("https://x/1").await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_broken BEFORE INSERT ON category_types \
             WHEN NEW.type_name = 'Broken' \
             BEGIN SELECT RAISE(ABORT, 'category rejected'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let report = store
            .reconcile_categories(&listing.key, &names(&["Python", "Broken", "Go"]))
            .await
            .unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.already_present, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Broken");
        assert!(report.failed[0].1.contains("category rejected"));
        assert!(!report.is_clean());

        assert_eq!(store.link_count(listing.key).await.unwrap(), 2);
        let stored = store.get_listing(&listing.key).await.unwrap().unwrap();
        assert!(stored.categories.contains("Python"));
        assert!(stored.categories.contains("Go"));
        assert!(!stored.categories.contains("Broken"));
    }

    #[tokio::test]
    async fn test_rejected_link_leaves_no_new_category() {
        let store = test_store().await;
        let listing = store.seed("https://x/1").await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_link BEFORE INSERT ON item_category_links \
             WHEN NEW.type_id IN (SELECT type_id FROM category_types WHERE type_name = 'Orphan') \
             BEGIN SELECT RAISE(ABORT, 'link rejected'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let report = store
            .reconcile_categories(&listing.key, &names(&["Orphan", "Rust"]))
            .await
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Orphan");
        assert_eq!(store.link_count(listing.key).await.unwrap(), 1);
        assert_eq!(store.category_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_link_to_vanished_listing_rolls_back_category() {
        let store = test_store().await;

        let err = store.link_category(42, "Design").await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(store.category_count().await.unwrap(), 0);
    }
}
