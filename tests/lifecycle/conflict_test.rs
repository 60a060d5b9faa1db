//! Tests for `src/lifecycle/conflict.rs` — conflict detection/resolution.

use std::sync::Arc;

use mnemon::extract::MemoryExtractor;
use mnemon::lifecycle::conflict::resolve_user_conflicts;
use mnemon::providers::router::ModelRouter;
use mnemon::store::{ImportanceLevel, MemoryKind};

use crate::support::{build_store, new_memory, ScriptedProvider};

fn extractor_with(provider: Arc<ScriptedProvider>) -> MemoryExtractor {
    MemoryExtractor::new(Arc::new(ModelRouter::for_testing(provider)), 0.7)
}

#[tokio::test]
async fn location_conflict_supersedes_the_older_memory() {
    let fixture = build_store().await;

    let older = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "I live in Chennai", 5, 0.9))
        .await
        .expect("create should succeed");
    let newer = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "I live in Bangalore now", 80, 0.9))
        .await
        .expect("create should succeed");

    let provider = Arc::new(ScriptedProvider::new("not json"));
    provider.respond_when("conflict", r#"{"conflict": true, "reason": "different cities"}"#);
    let extractor = extractor_with(provider);

    let resolved = resolve_user_conflicts(&fixture.store, &extractor, "u1", 100)
        .await
        .expect("conflict pass should succeed");
    assert_eq!(resolved, 1);

    let newer = fixture
        .store
        .get(newer.memory_id)
        .await
        .expect("get should succeed");
    let older = fixture
        .store
        .get(older.memory_id)
        .await
        .expect("get should succeed");

    // Mutually pointing annotations.
    assert_eq!(
        newer.context.get("supersedes").and_then(|v| v.as_str()),
        Some(older.memory_id.to_string().as_str())
    );
    assert_eq!(
        older.context.get("superseded_by").and_then(|v| v.as_str()),
        Some(newer.memory_id.to_string().as_str())
    );
    assert_eq!(
        newer.context.get("previous_value").and_then(|v| v.as_str()),
        Some("I live in Chennai")
    );

    // The older memory is demoted, not deleted.
    assert_eq!(older.importance_level, ImportanceLevel::Low);
    assert!((older.importance_score - 0.3).abs() < 1e-9);
    assert!(
        newer.importance_score > older.importance_score,
        "only the superseded memory is demoted"
    );
}

#[tokio::test]
async fn adjudicated_non_conflicts_are_left_alone() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "I live in Bangalore", 5, 0.9))
        .await
        .expect("create should succeed");
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "I live in the Indiranagar area", 8, 0.9))
        .await
        .expect("create should succeed");

    let provider = Arc::new(ScriptedProvider::new("not json"));
    provider.respond_when("conflict", r#"{"conflict": false, "reason": "compatible"}"#);
    let extractor = extractor_with(provider);

    let resolved = resolve_user_conflicts(&fixture.store, &extractor, "u1", 100)
        .await
        .expect("conflict pass should succeed");
    assert_eq!(resolved, 0);

    let memories = fixture
        .store
        .list("u1", None, 10)
        .await
        .expect("list should succeed");
    assert!(memories.iter().all(|m| !m.context.contains_key("superseded_by")));
}

#[tokio::test]
async fn preference_conflicts_are_linked_as_evolution() {
    let fixture = build_store().await;

    let older = fixture
        .store
        .create(new_memory("u1", MemoryKind::Preference, "I love spicy street food", 5, 0.9))
        .await
        .expect("create should succeed");
    let newer = fixture
        .store
        .create(new_memory(
            "u1",
            MemoryKind::Preference,
            "I dislike spicy dishes these days",
            60,
            0.9,
        ))
        .await
        .expect("create should succeed");

    let provider = Arc::new(ScriptedProvider::new("not json"));
    provider.respond_when("conflict", r#"{"conflict": true, "reason": "taste changed"}"#);
    let extractor = extractor_with(provider);

    let resolved = resolve_user_conflicts(&fixture.store, &extractor, "u1", 100)
        .await
        .expect("conflict pass should succeed");
    assert_eq!(resolved, 1);

    let newer = fixture
        .store
        .get(newer.memory_id)
        .await
        .expect("get should succeed");
    let older = fixture
        .store
        .get(older.memory_id)
        .await
        .expect("get should succeed");

    assert_eq!(
        newer.context.get("evolved_from").and_then(|v| v.as_str()),
        Some(older.memory_id.to_string().as_str())
    );
    assert_eq!(
        older.context.get("evolved_to").and_then(|v| v.as_str()),
        Some(newer.memory_id.to_string().as_str())
    );

    // Evolution keeps both memories at full standing.
    assert_eq!(older.importance_level, newer.importance_level);
    assert!(!older.context.contains_key("superseded_by"));
}

#[tokio::test]
async fn unmatched_patterns_skip_adjudication_entirely() {
    let fixture = build_store().await;
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "plays tennis on sundays", 5, 0.9))
        .await
        .expect("create should succeed");
    fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "owns a vintage typewriter", 8, 0.9))
        .await
        .expect("create should succeed");

    let provider = Arc::new(ScriptedProvider::new("not json"));
    let extractor = extractor_with(provider.clone());

    let resolved = resolve_user_conflicts(&fixture.store, &extractor, "u1", 100)
        .await
        .expect("conflict pass should succeed");
    assert_eq!(resolved, 0);
    assert_eq!(
        provider.request_count(),
        0,
        "no LLM call without a pattern match"
    );
}
