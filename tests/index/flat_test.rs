//! Tests for `src/index/mod.rs` — the in-process flat vector index.

use chrono::Utc;
use mnemon::index::{FlatIndex, IndexEntry, VectorIndex};
use mnemon::store::{ImportanceLevel, MemoryKind};
use uuid::Uuid;

use crate::support::test_vector;

fn entry(user: &str, content: &str) -> IndexEntry {
    IndexEntry {
        memory_id: Uuid::new_v4(),
        user_id: user.to_owned(),
        kind: MemoryKind::Fact,
        content: content.to_owned(),
        source_turn: 1,
        confidence: 0.9,
        created_at: Utc::now(),
        access_count: 0,
        importance_score: 0.7,
        importance_level: ImportanceLevel::Medium,
        conflicted: false,
        vector: test_vector(content),
    }
}

#[tokio::test]
async fn query_is_scoped_to_the_user() {
    let index = FlatIndex::new();
    index
        .upsert(entry("u1", "likes green tea"))
        .await
        .expect("upsert should succeed");
    index
        .upsert(entry("u2", "likes green tea"))
        .await
        .expect("upsert should succeed");

    let matches = index
        .query("u1", &test_vector("green tea"), 10)
        .await
        .expect("query should succeed");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].entry.user_id, "u1");

    let unknown = index
        .query("nobody", &test_vector("green tea"), 10)
        .await
        .expect("query should succeed");
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn upsert_replaces_existing_entry() {
    let index = FlatIndex::new();
    let mut first = entry("u1", "original content");
    let id = first.memory_id;
    index.upsert(first.clone()).await.expect("upsert should succeed");

    first.content = "replaced content".to_owned();
    first.vector = test_vector("replaced content");
    index.upsert(first).await.expect("upsert should succeed");

    assert_eq!(index.len(), 1, "replace must not duplicate");
    let matches = index
        .query("u1", &test_vector("replaced content"), 10)
        .await
        .expect("query should succeed");
    assert_eq!(matches[0].entry.memory_id, id);
    assert_eq!(matches[0].entry.content, "replaced content");
}

#[tokio::test]
async fn query_ranks_by_cosine_similarity() {
    let index = FlatIndex::new();
    index
        .upsert(entry("u1", "the cat sat on the mat"))
        .await
        .expect("upsert should succeed");
    index
        .upsert(entry("u1", "quarterly revenue projections"))
        .await
        .expect("upsert should succeed");

    let matches = index
        .query("u1", &test_vector("cat on a mat"), 10)
        .await
        .expect("query should succeed");
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].entry.content, "the cat sat on the mat");
    assert!(matches[0].score > matches[1].score);
}

#[tokio::test]
async fn limit_and_zero_limit_are_respected() {
    let index = FlatIndex::new();
    for i in 0..5 {
        index
            .upsert(entry("u1", &format!("memory number {i}")))
            .await
            .expect("upsert should succeed");
    }

    let top2 = index
        .query("u1", &test_vector("memory number"), 2)
        .await
        .expect("query should succeed");
    assert_eq!(top2.len(), 2);

    let none = index
        .query("u1", &test_vector("memory number"), 0)
        .await
        .expect("query should succeed");
    assert!(none.is_empty());
}

#[tokio::test]
async fn remove_and_remove_user_evict_entries() {
    let index = FlatIndex::new();
    let keep = entry("u1", "keep me");
    let drop_me = entry("u1", "drop me");
    let other = entry("u2", "other user");
    let drop_id = drop_me.memory_id;

    for e in [keep, drop_me, other] {
        index.upsert(e).await.expect("upsert should succeed");
    }

    index.remove(drop_id).await.expect("remove should succeed");
    assert_eq!(index.len(), 2);
    let matches = index
        .query("u1", &test_vector("drop me"), 10)
        .await
        .expect("query should succeed");
    assert!(matches.iter().all(|m| m.entry.memory_id != drop_id));

    index
        .remove_user("u1")
        .await
        .expect("remove_user should succeed");
    assert_eq!(index.len(), 1);

    // Removing a missing id is not an error.
    index
        .remove(Uuid::new_v4())
        .await
        .expect("missing remove should be a no-op");
}
