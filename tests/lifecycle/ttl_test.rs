//! Tests for TTL expiry and fulfilled-commitment cleanup.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mnemon::extract::MemoryExtractor;
use mnemon::lifecycle::{LifecyclePolicy, LifecycleWorker};
use mnemon::providers::router::ModelRouter;
use mnemon::store::{MemoryKind, MemoryStore};
use uuid::Uuid;

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

async fn backdate_created(store: &MemoryStore, memory_id: Uuid, days: i64) {
    let stamp = (Utc::now() - Duration::days(days)).to_rfc3339();
    sqlx::query("UPDATE memories SET created_at = ?1 WHERE memory_id = ?2")
        .bind(stamp)
        .bind(memory_id.to_string())
        .execute(store.pool())
        .await
        .expect("backdate should succeed");
}

#[tokio::test]
async fn old_entities_expire_but_facts_of_equal_age_are_retained() {
    let fixture = build_store().await;

    let entity = fixture
        .store
        .create(new_memory("u1", MemoryKind::Entity, "college roommate Priya", 1, 0.9))
        .await
        .expect("create should succeed");
    let fact = fixture
        .store
        .create(new_memory("u1", MemoryKind::Fact, "grew up near the coast", 1, 0.9))
        .await
        .expect("create should succeed");
    backdate_created(&fixture.store, entity.memory_id, 181).await;
    backdate_created(&fixture.store, fact.memory_id, 181).await;

    let report = worker_for(&fixture)
        .run_once("u1", 10)
        .await
        .expect("lifecycle pass should succeed");

    assert_eq!(report.expired_entities, 1);
    assert!(fixture.store.get(entity.memory_id).await.is_err());
    assert!(
        fixture.store.get(fact.memory_id).await.is_ok(),
        "facts are persistent regardless of age"
    );
}

#[tokio::test]
async fn young_entities_survive() {
    let fixture = build_store().await;
    let entity = fixture
        .store
        .create(new_memory("u1", MemoryKind::Entity, "new colleague Wei", 1, 0.9))
        .await
        .expect("create should succeed");
    backdate_created(&fixture.store, entity.memory_id, 30).await;

    let report = worker_for(&fixture)
        .run_once("u1", 10)
        .await
        .expect("lifecycle pass should succeed");
    assert_eq!(report.expired_entities, 0);
    assert!(fixture.store.get(entity.memory_id).await.is_ok());
}

#[tokio::test]
async fn critical_entities_never_expire() {
    let fixture = build_store().await;

    // "my wife" carries a critical identity keyword.
    let critical = fixture
        .store
        .create(new_memory("u1", MemoryKind::Entity, "my wife Anya", 1, 1.0))
        .await
        .expect("create should succeed");
    backdate_created(&fixture.store, critical.memory_id, 400).await;

    let report = worker_for(&fixture)
        .run_once("u1", 10)
        .await
        .expect("lifecycle pass should succeed");
    assert_eq!(report.expired_entities, 0);
    assert!(
        fixture.store.get(critical.memory_id).await.is_ok(),
        "critical importance is exempt from TTL"
    );
}

#[tokio::test]
async fn fulfilled_commitments_are_deleted_after_the_grace_window() {
    let fixture = build_store().await;

    let stale = fixture
        .store
        .create(new_memory("u1", MemoryKind::Commitment, "send the old report", 1, 0.9))
        .await
        .expect("create should succeed");
    let fresh = fixture
        .store
        .create(new_memory("u1", MemoryKind::Commitment, "send the new report", 2, 0.9))
        .await
        .expect("create should succeed");
    let open = fixture
        .store
        .create(new_memory("u1", MemoryKind::Commitment, "plan the offsite", 3, 0.9))
        .await
        .expect("create should succeed");

    for id in [stale.memory_id, fresh.memory_id] {
        fixture
            .store
            .mark_commitment_fulfilled(id)
            .await
            .expect("fulfillment should succeed");
    }

    // Push the stale fulfillment outside the grace window.
    let mut context = fixture
        .store
        .get(stale.memory_id)
        .await
        .expect("get should succeed")
        .context;
    context.insert(
        "fulfilled_at".to_owned(),
        serde_json::Value::String((Utc::now() - Duration::days(8)).to_rfc3339()),
    );
    fixture
        .store
        .update_context(stale.memory_id, context)
        .await
        .expect("context update should succeed");

    let report = worker_for(&fixture)
        .run_once("u1", 10)
        .await
        .expect("lifecycle pass should succeed");

    assert_eq!(report.removed_commitments, 1);
    assert!(fixture.store.get(stale.memory_id).await.is_err());
    assert!(
        fixture.store.get(fresh.memory_id).await.is_ok(),
        "recently fulfilled commitments wait out the grace window"
    );
    assert!(
        fixture.store.get(open.memory_id).await.is_ok(),
        "unfulfilled commitments are persistent"
    );
}
