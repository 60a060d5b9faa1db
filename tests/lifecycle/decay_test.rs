//! Tests for the decay refresh pass.

use std::sync::Arc;

use mnemon::extract::MemoryExtractor;
use mnemon::lifecycle::{LifecyclePolicy, LifecycleWorker};
use mnemon::providers::router::ModelRouter;
use mnemon::store::MemoryKind;

use crate::support::{build_store, new_memory, ScriptedProvider, TestStore};

fn worker_for(fixture: &TestStore) -> LifecycleWorker {
    let provider = Arc::new(ScriptedProvider::new("not json"));
    let extractor = Arc::new(MemoryExtractor::new(
        Arc::new(ModelRouter::for_testing(provider)),
        0.7,
    ));
    LifecycleWorker::new(
        Arc::clone(&fixture.store),
        extractor,
        LifecyclePolicy {
            entity_ttl_days: 180,
            commitment_grace_days: 7,
            decay_write_threshold: 0.05,
            consolidation_threshold: 0.90,
        },
    )
}

#[tokio::test]
async fn aged_memories_get_lower_decay_scores() {
    let fixture = build_store().await;
    let memory = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "played in a band once", 0, 0.9))
        .await
        .expect("create should succeed");
    assert_eq!(memory.decay_score, 1.0);

    let report = worker_for(&fixture)
        .run_once("u1", 500)
        .await
        .expect("lifecycle pass should succeed");
    assert_eq!(report.decay_updates, 1);

    let refreshed = fixture
        .store
        .get(memory.memory_id)
        .await
        .expect("get should succeed");
    // 0.95^(500/100) with no access boost.
    assert!((refreshed.decay_score - 0.95_f64.powi(5)).abs() < 1e-9);
}

#[tokio::test]
async fn small_changes_are_not_written_back() {
    let fixture = build_store().await;
    let memory = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "recent detail", 0, 0.9))
        .await
        .expect("create should succeed");

    // 0.95^(50/100) = 0.9747; |1.0 - 0.9747| < 0.05 stays unwritten.
    let report = worker_for(&fixture)
        .run_once("u1", 50)
        .await
        .expect("lifecycle pass should succeed");
    assert_eq!(report.decay_updates, 0);

    let unchanged = fixture
        .store
        .get(memory.memory_id)
        .await
        .expect("get should succeed");
    assert_eq!(unchanged.decay_score, 1.0);
}

#[tokio::test]
async fn critical_memories_do_not_decay() {
    let fixture = build_store().await;
    let critical = fixture
        .store
        .create(new_memory(
            "u1",
            MemoryKind::Fact,
            "My name is Raj",
            0,
            1.0,
        ))
        .await
        .expect("create should succeed");

    let report = worker_for(&fixture)
        .run_once("u1", 5000)
        .await
        .expect("lifecycle pass should succeed");
    assert_eq!(report.decay_updates, 0);

    let unchanged = fixture
        .store
        .get(critical.memory_id)
        .await
        .expect("get should succeed");
    assert_eq!(unchanged.decay_score, 1.0, "critical never decays");
}

#[tokio::test]
async fn access_boost_slows_decay() {
    let fixture = build_store().await;
    let accessed = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "frequently recalled fact", 0, 0.9))
        .await
        .expect("create should succeed");
    let idle = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "rarely recalled detail", 0, 0.9))
        .await
        .expect("create should succeed");

    fixture.store.record_access(vec![accessed.memory_id], 1);
    fixture.store.record_access(vec![accessed.memory_id], 2);
    fixture.store.record_access(vec![accessed.memory_id], 3);
    crate::support::settle().await;

    worker_for(&fixture)
        .run_once("u1", 500)
        .await
        .expect("lifecycle pass should succeed");

    let accessed = fixture
        .store
        .get(accessed.memory_id)
        .await
        .expect("get should succeed");
    let idle = fixture
        .store
        .get(idle.memory_id)
        .await
        .expect("get should succeed");
    assert!(accessed.decay_score > idle.decay_score);
}
