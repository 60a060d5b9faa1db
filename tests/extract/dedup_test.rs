//! Tests for `src/extract/dedup.rs` — near-duplicate rejection.

use mnemon::extract::dedup::Deduplicator;
use mnemon::store::MemoryKind;

use crate::support::{build_store, new_memory, FailingEmbedder};

#[tokio::test]
async fn identical_content_is_a_duplicate() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "User lives in Bangalore", 5, 0.9))
        .await
        .expect("create should succeed");

    let dedup = Deduplicator::new(0.95, 50);
    assert!(
        dedup
            .is_duplicate(
                &fixture.store,
                fixture.embedder.as_ref(),
                "u1",
                "User lives in Bangalore"
            )
            .await
    );
}

#[tokio::test]
async fn unrelated_content_is_allowed() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "User lives in Bangalore", 5, 0.9))
        .await
        .expect("create should succeed");

    let dedup = Deduplicator::new(0.95, 50);
    assert!(
        !dedup
            .is_duplicate(
                &fixture.store,
                fixture.embedder.as_ref(),
                "u1",
                "Prefers jazz over classical music"
            )
            .await
    );
}

#[tokio::test]
async fn duplicates_are_scoped_per_user() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "User lives in Bangalore", 5, 0.9))
        .await
        .expect("create should succeed");

    let dedup = Deduplicator::new(0.95, 50);
    assert!(
        !dedup
            .is_duplicate(
                &fixture.store,
                fixture.embedder.as_ref(),
                "u2",
                "User lives in Bangalore"
            )
            .await,
        "another user's near-identical memory is not a duplicate"
    );
}

#[tokio::test]
async fn high_threshold_never_rejects_similar_but_distinct_content() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "User lives in Bangalore", 5, 0.9))
        .await
        .expect("create should succeed");

    // Similar wording, but not an identical embedding.
    let dedup = Deduplicator::new(1.0, 50);
    assert!(
        !dedup
            .is_duplicate(
                &fixture.store,
                fixture.embedder.as_ref(),
                "u1",
                "User lives near Bangalore"
            )
            .await
    );
}

#[tokio::test]
async fn embedder_failure_fails_open() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "User lives in Bangalore", 5, 0.9))
        .await
        .expect("create should succeed");

    let dedup = Deduplicator::new(0.95, 50);
    let failing = FailingEmbedder;
    assert!(
        !dedup
            .is_duplicate(&fixture.store, &failing, "u1", "User lives in Bangalore")
            .await,
        "a broken check must allow the create"
    );
}
