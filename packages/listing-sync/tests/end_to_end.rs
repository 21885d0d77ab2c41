#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use listing_sync::testing::MockExtractor;
use listing_sync::{
    DocumentStore, ExtractionResult, ListingStore, Pruner, Reconciler, RelationalStore,
};

const URL: &str = "https://x/1";

fn course_page() -> MockExtractor {
    MockExtractor::new().with_result(
        URL,
        ExtractionResult::new()
            .with_expiry("3 days left")
            .with_discount("85% off")
            .with_categories(["Development", "Python"]),
    )
}

#[tokio::test]
async fn test_relational_scalar_then_category_pass() {
    let store = RelationalStore::in_memory().await.unwrap();
    let seeded = store.seed(URL).await.unwrap();

    let reconciler = Reconciler::new(store, course_page()).with_pacing(Duration::ZERO);

    let scalars = reconciler.run_scalar_pass().await.unwrap();
    assert_eq!(scalars.updated, 1);

    let categories = reconciler.run_category_pass().await.unwrap();
    assert_eq!(categories.updated, 1);
    assert!(categories.is_success());

    let listing = reconciler
        .store()
        .get_listing(&seeded.key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listing.expiry_status.as_deref(), Some("3 days left"));
    assert_eq!(listing.discount.as_deref(), Some("85% off"));
    assert_eq!(
        listing.categories.iter().cloned().collect::<Vec<_>>(),
        vec!["Development", "Python"]
    );
    assert!(listing.last_updated.is_some());

    assert_eq!(reconciler.store().link_count(seeded.key).await.unwrap(), 2);
    assert_eq!(reconciler.store().category_count().await.unwrap(), 2);

    // A repeat run adds nothing.
    reconciler.run_category_pass().await.unwrap();
    assert_eq!(reconciler.store().link_count(seeded.key).await.unwrap(), 2);

    reconciler.store().close().await;
}

#[tokio::test]
async fn test_document_scalar_then_category_pass() {
    let store = DocumentStore::in_memory().await.unwrap();
    store.seed(URL).await.unwrap();

    let reconciler = Reconciler::new(store, course_page()).with_pacing(Duration::ZERO);
    reconciler.run_scalar_pass().await.unwrap();
    reconciler.run_category_pass().await.unwrap();
    reconciler.run_category_pass().await.unwrap();

    let listing = reconciler.store().find_by_url(URL).await.unwrap().unwrap();
    assert_eq!(listing.key, URL);
    assert_eq!(listing.expiry_status.as_deref(), Some("3 days left"));
    assert_eq!(listing.discount.as_deref(), Some("85% off"));
    assert_eq!(listing.categories.len(), 2);
    assert!(listing.categories.contains("Development"));
    assert!(listing.categories.contains("Python"));

    reconciler.store().close().await;
}

#[tokio::test]
async fn test_prune_after_passes_keeps_checked_listings() {
    let store = Arc::new(RelationalStore::in_memory().await.unwrap());
    let kept = store.seed(URL).await.unwrap();
    let dropped = store.seed("https://x/2").await.unwrap();

    // Only the first page shows an expiry; the second never will.
    let reconciler = Reconciler::new(Arc::clone(&store), course_page()).with_pacing(Duration::ZERO);
    reconciler.run_scalar_pass().await.unwrap();
    reconciler.run_category_pass().await.unwrap();

    let report = Pruner::new(Arc::clone(&store)).run().await.unwrap();
    assert_eq!(report.listings_removed, 1);
    assert_eq!(report.links_removed, 0);

    assert!(store.get_listing(&kept.key).await.unwrap().is_some());
    assert!(store.get_listing(&dropped.key).await.unwrap().is_none());
    assert_eq!(store.link_count(kept.key).await.unwrap(), 2);
}
