//! Tests for `src/orchestrate/mod.rs` — the per-turn state machine and the
//! detached write path.

use std::sync::Arc;

use mnemon::error::EngineError;
use mnemon::orchestrate::TurnRequest;
use mnemon::store::MemoryKind;
use uuid::Uuid;

use crate::support::{build_engine, build_engine_with, settle, ScriptedProvider};

fn turn_request(user: &str, conversation: Option<Uuid>, number: i64, message: &str) -> TurnRequest {
    TurnRequest {
        user_id: user.to_owned(),
        conversation_id: conversation,
        turn_number: number,
        message: message.to_owned(),
        include_memories: true,
        metadata: serde_json::Value::Object(Default::default()),
    }
}

#[tokio::test]
async fn turn_persists_a_row_matching_the_response() {
    let engine = build_engine().await;

    let response = engine
        .orchestrator
        .process(turn_request("u1", None, 0, "hello there, how are you?"))
        .await
        .expect("turn should succeed");

    assert_eq!(response.turn_number, 0);
    assert_eq!(response.response, "understood");

    let export = engine
        .conversations
        .export(response.conversation_id, "u1")
        .await
        .expect("export should succeed");
    assert_eq!(export.conversation.turn_count, 1);
    assert_eq!(export.turns.len(), 1);

    let row = &export.turns[0];
    assert_eq!(row.turn_id, response.turn_id);
    assert_eq!(row.turn_number, 0);
    assert_eq!(row.user_message, "hello there, how are you?");
    assert_eq!(row.assistant_message, "understood");

    let response_ids: Vec<Uuid> = response
        .active_memories
        .iter()
        .map(|m| m.memory_id)
        .collect();
    assert_eq!(
        row.memories_retrieved, response_ids,
        "the persisted row and the response must expose the same memory ids"
    );
}

#[tokio::test]
async fn llm_failure_persists_nothing() {
    let provider = Arc::new(ScriptedProvider::new("unused"));
    let engine = build_engine_with(provider.clone()).await;
    provider.set_failing(true);

    let err = engine
        .orchestrator
        .process(turn_request("u1", None, 0, "hello"))
        .await
        .expect_err("generation failure must surface");
    assert!(matches!(err, EngineError::DependencyUnavailable { .. }));

    // The conversation was created in step 1, but no turn may exist.
    let conversations = engine
        .conversations
        .list("u1", true, 10, 0)
        .await
        .expect("list should succeed");
    for conversation in conversations {
        assert_eq!(conversation.turn_count, 0, "no turn persisted after LLM failure");
    }
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let engine = build_engine().await;
    let err = engine
        .orchestrator
        .process(turn_request("u1", Some(Uuid::new_v4()), 0, "hello"))
        .await
        .expect_err("unknown conversation must fail");
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn conversation_ownership_is_validated() {
    let engine = build_engine().await;
    let first = engine
        .orchestrator
        .process(turn_request("u1", None, 0, "mine"))
        .await
        .expect("turn should succeed");

    let err = engine
        .orchestrator
        .process(turn_request(
            "intruder",
            Some(first.conversation_id),
            0,
            "yours now",
        ))
        .await
        .expect_err("foreign conversation must fail");
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_side_effects() {
    let engine = build_engine().await;

    let empty = engine
        .orchestrator
        .process(turn_request("u1", None, 0, ""))
        .await;
    assert!(matches!(empty, Err(EngineError::Validation(_))));

    let negative = engine
        .orchestrator
        .process(turn_request("u1", None, -1, "hello"))
        .await;
    assert!(matches!(negative, Err(EngineError::Validation(_))));

    let oversized = "x".repeat(10_001);
    let too_long = engine
        .orchestrator
        .process(turn_request("u1", None, 0, &oversized))
        .await;
    assert!(matches!(too_long, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn detached_extraction_stores_memories_after_the_turn() {
    let provider = Arc::new(ScriptedProvider::new("understood"));
    provider.respond_when(
        "memory extraction",
        r#"{"memories": [{"type": "preference", "content": "Prefers to be called after 11 AM", "confidence": 0.9, "tags": ["schedule"]}]}"#,
    );
    let engine = build_engine_with(provider).await;

    let response = engine
        .orchestrator
        .process(turn_request(
            "raj",
            None,
            1,
            "My name is Raj and I prefer to be called after 11 AM.",
        ))
        .await
        .expect("turn should succeed");
    settle().await;

    let memories = engine
        .store
        .list("raj", None, 10)
        .await
        .expect("list should succeed");
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].kind, MemoryKind::Preference);
    assert_eq!(memories[0].source_turn, 1);
    assert!(memories[0].content.contains("after 11 AM"));

    // The detached task backfills memories_created on the turn row.
    let export = engine
        .conversations
        .export(response.conversation_id, "raj")
        .await
        .expect("export should succeed");
    assert_eq!(export.turns[0].memories_created, vec![memories[0].memory_id]);
}

#[tokio::test]
async fn preference_recall_across_a_large_turn_gap() {
    let provider = Arc::new(ScriptedProvider::new("understood"));
    provider.respond_when(
        "memory extraction",
        r#"{"memories": [{"type": "preference", "content": "Prefers to be called after 11 AM", "confidence": 0.9}]}"#,
    );
    let engine = build_engine_with(provider.clone()).await;

    let first = engine
        .orchestrator
        .process(turn_request(
            "raj",
            None,
            1,
            "My name is Raj and I prefer to be called after 11 AM.",
        ))
        .await
        .expect("turn should succeed");
    settle().await;

    let recall = engine
        .orchestrator
        .process(turn_request(
            "raj",
            Some(first.conversation_id),
            100,
            "What time did I say you prefer to be called?",
        ))
        .await
        .expect("turn should succeed");

    assert!(
        recall
            .active_memories
            .iter()
            .any(|m| m.content.contains("after 11 AM")),
        "the turn-1 preference must be among the active memories"
    );
    let active = recall
        .active_memories
        .iter()
        .find(|m| m.content.contains("after 11 AM"))
        .expect("preference present");
    assert_eq!(active.source_turn, 1);
    assert!((0.0..=1.0).contains(&active.relevance_score));

    // The injected system prompt carried the remembered time.
    let injected = provider
        .recorded_systems()
        .iter()
        .any(|s| s.contains("CORE RULES") && s.contains("after 11 AM"));
    assert!(injected, "memory must be injected into the generation prompt");
}

#[tokio::test]
async fn duplicate_extractions_across_turns_store_one_memory() {
    let provider = Arc::new(ScriptedProvider::new("understood"));
    let candidate =
        r#"{"memories": [{"type": "fact", "content": "User lives in Bangalore", "confidence": 0.9}]}"#;
    provider.respond_when("memory extraction", candidate);
    provider.respond_when("memory extraction", candidate);
    let engine = build_engine_with(provider).await;

    let first = engine
        .orchestrator
        .process(turn_request("u1", None, 5, "I live in Bangalore by the way"))
        .await
        .expect("turn should succeed");
    settle().await;

    engine
        .orchestrator
        .process(turn_request(
            "u1",
            Some(first.conversation_id),
            7,
            "Bangalore is where I live",
        ))
        .await
        .expect("turn should succeed");
    settle().await;

    let memories = engine
        .store
        .list("u1", None, 10)
        .await
        .expect("list should succeed");
    assert_eq!(
        memories.len(),
        1,
        "both turns extracted the same fact; exactly one row must exist"
    );
}

#[tokio::test]
async fn canonical_preference_updates_in_place_across_turns() {
    let provider = Arc::new(ScriptedProvider::new("understood"));
    provider.respond_when(
        "memory extraction",
        r#"{"memories": [{"type": "preference", "content": "Prefer morning calls", "confidence": 0.8}]}"#,
    );
    provider.respond_when(
        "memory extraction",
        r#"{"memories": [{"type": "preference", "content": "Prefer calls after 11 AM", "confidence": 0.9}]}"#,
    );
    let engine = build_engine_with(provider).await;

    let first = engine
        .orchestrator
        .process(turn_request("u1", None, 10, "Prefer morning calls."))
        .await
        .expect("turn should succeed");
    settle().await;

    engine
        .orchestrator
        .process(turn_request(
            "u1",
            Some(first.conversation_id),
            300,
            "Actually, prefer calls after 11 AM.",
        ))
        .await
        .expect("turn should succeed");
    settle().await;

    let memories = engine
        .store
        .list("u1", None, 10)
        .await
        .expect("list should succeed");
    assert_eq!(memories.len(), 1, "canonical update must not insert");
    assert_eq!(memories[0].content, "Prefer calls after 11 AM");
    assert_eq!(memories[0].source_turn, 300);
    assert_eq!(
        memories[0].context.get("version").and_then(|v| v.as_i64()),
        Some(2)
    );
}

#[tokio::test]
async fn irrelevant_corpus_stays_silent() {
    let engine = build_engine().await;
    for i in 0..8 {
        engine
            .store
            .create(crate::support::new_memory(
                "u1",
                MemoryKind::Preference,
                &format!("favorite recipe number {i} involves slow-roasted garlic"),
                1,
                0.9,
            ))
            .await
            .expect("create should succeed");
    }

    let response = engine
        .orchestrator
        .process(turn_request("u1", None, 5, "Explain TCP congestion control."))
        .await
        .expect("turn should succeed");

    assert!(
        response.active_memories.is_empty(),
        "silence mode must expose no memories"
    );

    let export = engine
        .conversations
        .export(response.conversation_id, "u1")
        .await
        .expect("export should succeed");
    assert!(export.turns[0].memories_retrieved.is_empty());
}

#[tokio::test]
async fn short_term_tail_is_appended_chronologically() {
    let provider = Arc::new(ScriptedProvider::new("understood"));
    let engine = build_engine_with(provider.clone()).await;

    let first = engine
        .orchestrator
        .process(turn_request("u1", None, 0, "my first message"))
        .await
        .expect("turn should succeed");
    for number in 1..=6 {
        engine
            .orchestrator
            .process(turn_request(
                "u1",
                Some(first.conversation_id),
                number,
                &format!("message number {number}"),
            ))
            .await
            .expect("turn should succeed");
    }

    let requests = provider.requests.lock().expect("requests lock");
    let last_chat = requests
        .iter()
        .rev()
        .find(|r| {
            r.system
                .as_deref()
                .is_some_and(|s| s.contains("CORE RULES"))
        })
        .expect("a chat request exists");

    // Tail of 5 turns = 10 history messages + the new user message.
    assert_eq!(last_chat.messages.len(), 11);
    assert_eq!(last_chat.messages[0].content, "message number 1");
    assert_eq!(
        last_chat.messages.last().expect("non-empty").content,
        "message number 6"
    );
}

#[tokio::test]
async fn first_turn_schedules_title_generation() {
    let provider = Arc::new(ScriptedProvider::new("understood"));
    provider.respond_when("Generate a concise conversation title", "Bangalore travel notes");
    let engine = build_engine_with(provider).await;

    let response = engine
        .orchestrator
        .process(turn_request("u1", None, 0, "Planning my Bangalore trip"))
        .await
        .expect("turn should succeed");
    settle().await;

    let conversation = engine
        .conversations
        .get(response.conversation_id, "u1")
        .await
        .expect("get should succeed");
    assert_eq!(conversation.title, "Bangalore travel notes");
}

#[tokio::test]
async fn opting_out_of_memories_skips_retrieval() {
    let engine = build_engine().await;
    engine
        .store
        .create(crate::support::new_memory(
            "u1",
            MemoryKind::Fact,
            "likes green tea",
            1,
            0.9,
        ))
        .await
        .expect("create should succeed");

    let baseline = engine.embedder.call_count();
    let mut request = turn_request("u1", None, 5, "likes green tea");
    request.include_memories = false;
    let response = engine
        .orchestrator
        .process(request)
        .await
        .expect("turn should succeed");

    assert!(response.active_memories.is_empty());
    assert_eq!(
        engine.embedder.call_count(),
        baseline,
        "opting out must not embed the query"
    );
}
