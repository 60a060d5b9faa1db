//! Tests for `src/store/conversations.rs` — conversations, turns, tail.

use mnemon::error::EngineError;
use mnemon::store::{ConversationStore, NewTurn};
use uuid::Uuid;

use crate::support::memory_pool;

fn turn(conversation_id: Uuid, user: &str, number: i64, message: &str) -> NewTurn {
    NewTurn {
        conversation_id,
        user_id: user.to_owned(),
        turn_number: number,
        user_message: message.to_owned(),
        assistant_message: format!("reply to {message}"),
        metadata: serde_json::Value::Object(Default::default()),
        memories_retrieved: Vec::new(),
        memories_created: Vec::new(),
    }
}

#[tokio::test]
async fn get_is_owner_checked() {
    let store = ConversationStore::new(memory_pool().await);
    let created = store
        .create("u1", Some("Trip planning"), serde_json::json!({}))
        .await
        .expect("create should succeed");

    let fetched = store
        .get(created.conversation_id, "u1")
        .await
        .expect("owner get should succeed");
    assert_eq!(fetched.title, "Trip planning");
    assert_eq!(fetched.turn_count, 0);

    let other = store.get(created.conversation_id, "u2").await;
    assert!(
        matches!(other, Err(EngineError::NotFound { .. })),
        "another user's lookup must behave like a missing conversation"
    );
}

#[tokio::test]
async fn append_turn_bumps_turn_count_and_updated_at() {
    let store = ConversationStore::new(memory_pool().await);
    let conversation = store
        .create("u1", None, serde_json::json!({}))
        .await
        .expect("create should succeed");

    store
        .append_turn(turn(conversation.conversation_id, "u1", 0, "hello"))
        .await
        .expect("append should succeed");
    store
        .append_turn(turn(conversation.conversation_id, "u1", 1, "again"))
        .await
        .expect("append should succeed");

    let fetched = store
        .get(conversation.conversation_id, "u1")
        .await
        .expect("get should succeed");
    assert_eq!(fetched.turn_count, 2);
    assert!(fetched.updated_at >= conversation.updated_at);
}

#[tokio::test]
async fn tail_returns_last_turns_chronologically() {
    let store = ConversationStore::new(memory_pool().await);
    let conversation = store
        .create("u1", None, serde_json::json!({}))
        .await
        .expect("create should succeed");

    for number in 0..7 {
        store
            .append_turn(turn(
                conversation.conversation_id,
                "u1",
                number,
                &format!("message {number}"),
            ))
            .await
            .expect("append should succeed");
    }

    let tail = store
        .tail(conversation.conversation_id, 5)
        .await
        .expect("tail should succeed");
    let numbers: Vec<i64> = tail.iter().map(|t| t.turn_number).collect();
    assert_eq!(numbers, vec![2, 3, 4, 5, 6], "last five, oldest first");
}

#[tokio::test]
async fn delete_removes_conversation_and_turns() {
    let pool = memory_pool().await;
    let store = ConversationStore::new(pool.clone());
    let conversation = store
        .create("u1", None, serde_json::json!({}))
        .await
        .expect("create should succeed");
    store
        .append_turn(turn(conversation.conversation_id, "u1", 0, "hello"))
        .await
        .expect("append should succeed");

    store
        .delete(conversation.conversation_id, "u1")
        .await
        .expect("delete should succeed");

    let missing = store.get(conversation.conversation_id, "u1").await;
    assert!(matches!(missing, Err(EngineError::NotFound { .. })));

    let (count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM conversation_turns WHERE conversation_id = ?1")
            .bind(conversation.conversation_id.to_string())
            .fetch_one(&pool)
            .await
            .expect("count should succeed");
    assert_eq!(count, 0, "turns must be deleted with the conversation");
}

#[tokio::test]
async fn search_matches_title_and_turn_content() {
    let store = ConversationStore::new(memory_pool().await);
    let by_title = store
        .create("u1", Some("Rust borrow checker"), serde_json::json!({}))
        .await
        .expect("create should succeed");
    let by_content = store
        .create("u1", Some("Untitled"), serde_json::json!({}))
        .await
        .expect("create should succeed");
    store
        .append_turn(turn(
            by_content.conversation_id,
            "u1",
            0,
            "my sourdough keeps collapsing",
        ))
        .await
        .expect("append should succeed");

    let rust_hits = store
        .search("u1", "borrow", 10)
        .await
        .expect("search should succeed");
    assert_eq!(rust_hits.len(), 1);
    assert_eq!(rust_hits[0].conversation_id, by_title.conversation_id);

    let bread_hits = store
        .search("u1", "sourdough", 10)
        .await
        .expect("search should succeed");
    assert_eq!(bread_hits.len(), 1);
    assert_eq!(bread_hits[0].conversation_id, by_content.conversation_id);

    let other_user = store
        .search("u2", "sourdough", 10)
        .await
        .expect("search should succeed");
    assert!(other_user.is_empty());
}

#[tokio::test]
async fn export_returns_all_turns_in_order() {
    let store = ConversationStore::new(memory_pool().await);
    let conversation = store
        .create("u1", Some("Export me"), serde_json::json!({}))
        .await
        .expect("create should succeed");
    for number in 0..3 {
        store
            .append_turn(turn(
                conversation.conversation_id,
                "u1",
                number,
                &format!("m{number}"),
            ))
            .await
            .expect("append should succeed");
    }

    let export = store
        .export(conversation.conversation_id, "u1")
        .await
        .expect("export should succeed");
    assert_eq!(export.conversation.title, "Export me");
    assert_eq!(export.turns.len(), 3);
    assert!(export
        .turns
        .windows(2)
        .all(|w| w[0].turn_number < w[1].turn_number));
}

#[tokio::test]
async fn set_memories_created_backfills_turn_row() {
    let store = ConversationStore::new(memory_pool().await);
    let conversation = store
        .create("u1", None, serde_json::json!({}))
        .await
        .expect("create should succeed");
    let persisted = store
        .append_turn(turn(conversation.conversation_id, "u1", 0, "hello"))
        .await
        .expect("append should succeed");
    assert!(persisted.memories_created.is_empty());

    let created_ids = vec![Uuid::new_v4(), Uuid::new_v4()];
    store
        .set_memories_created(persisted.turn_id, &created_ids)
        .await
        .expect("backfill should succeed");

    let export = store
        .export(conversation.conversation_id, "u1")
        .await
        .expect("export should succeed");
    assert_eq!(export.turns[0].memories_created, created_ids);
}

#[tokio::test]
async fn update_patches_title_and_archive_flag() {
    let store = ConversationStore::new(memory_pool().await);
    let conversation = store
        .create("u1", None, serde_json::json!({}))
        .await
        .expect("create should succeed");

    let updated = store
        .update(
            conversation.conversation_id,
            "u1",
            Some("Named now"),
            Some(true),
            None,
        )
        .await
        .expect("update should succeed");
    assert_eq!(updated.title, "Named now");
    assert!(updated.is_archived);

    let active_only = store
        .list("u1", false, 10, 0)
        .await
        .expect("list should succeed");
    assert!(active_only.is_empty(), "archived excluded by default");

    let with_archived = store
        .list("u1", true, 10, 0)
        .await
        .expect("list should succeed");
    assert_eq!(with_archived.len(), 1);
}
