//! Per-turn orchestration.
//!
//! One call site drives the turn state machine: resolve conversation →
//! retrieve → compose → generate → persist → detach side-effects → respond.
//! Steps through persistence are sequential and synchronous; the extraction
//! pipeline, title generation, and access accounting are fire-and-forget.
//! Detached tasks receive only primitives and clone their own store handles,
//! never request-scoped state; their failures are logged and swallowed.

pub mod prompt;
pub mod title;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::extract::canonical::{CanonicalOutcome, Canonicalizer};
use crate::extract::dedup::Deduplicator;
use crate::extract::MemoryExtractor;
use crate::providers::router::{ModelRouter, ROLE_CHAT};
use crate::providers::{ChatMessage, CompletionRequest};
use crate::retrieve::intent::{IntentClassifier, QueryIntent};
use crate::retrieve::{silence_verdict, Retriever, ScoredMemory, SearchOutcome, SearchRequest};
use crate::store::conversations::SHORT_TERM_TAIL_TURNS;
use crate::store::{ConversationStore, MemoryKind, MemoryStore, NewTurn};

/// Maximum tokens for one generated response.
const GENERATION_MAX_TOKENS: u32 = 1000;

/// One inbound turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Authenticated user scope.
    pub user_id: String,
    /// Existing conversation to continue, or `None` to start one.
    pub conversation_id: Option<Uuid>,
    /// Client-assigned monotonic turn number (>= 0).
    pub turn_number: i64,
    /// The user's message, 1..=10000 chars.
    pub message: String,
    /// Whether to retrieve and inject long-term memories.
    pub include_memories: bool,
    /// Free-form metadata persisted with the turn.
    pub metadata: Value,
}

/// A memory that influenced the response.
#[derive(Debug, Clone)]
pub struct ActiveMemory {
    /// Memory identifier.
    pub memory_id: Uuid,
    /// Content as injected.
    pub content: String,
    /// Memory kind.
    pub kind: MemoryKind,
    /// Turn of origin.
    pub source_turn: i64,
    /// Composite relevance at retrieval time.
    pub relevance_score: f64,
    /// Extraction confidence.
    pub confidence: f64,
}

impl ActiveMemory {
    fn from_scored(scored: &ScoredMemory) -> Self {
        Self {
            memory_id: scored.memory.memory_id,
            content: scored.memory.content.clone(),
            kind: scored.memory.kind,
            source_turn: scored.memory.source_turn,
            relevance_score: scored.relevance,
            confidence: scored.memory.confidence,
        }
    }
}

/// Per-step latency, reported with every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyBreakdown {
    /// Retrieval time in milliseconds.
    pub retrieval_ms: u64,
    /// LLM generation time in milliseconds.
    pub generation_ms: u64,
    /// Turn-persistence time in milliseconds.
    pub persistence_ms: u64,
    /// End-to-end processing time in milliseconds.
    pub total_ms: u64,
}

/// The orchestrator's reply for one turn.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    /// Persisted turn id.
    pub turn_id: Uuid,
    /// Conversation the turn belongs to.
    pub conversation_id: Uuid,
    /// Echo of the request's turn number.
    pub turn_number: i64,
    /// Generated assistant text.
    pub response: String,
    /// Memories that influenced the response (empty under silence mode).
    pub active_memories: Vec<ActiveMemory>,
    /// Latency breakdown.
    pub latency: LatencyBreakdown,
}

/// Shared dependencies for the orchestrator.
pub struct OrchestratorDeps {
    /// Memory row store + index.
    pub store: Arc<MemoryStore>,
    /// Conversation/turn store.
    pub conversations: Arc<ConversationStore>,
    /// Retrieval engine.
    pub retriever: Arc<Retriever>,
    /// Extraction pipeline.
    pub extractor: Arc<MemoryExtractor>,
    /// Canonical preference resolver.
    pub canonicalizer: Canonicalizer,
    /// Near-duplicate rejector.
    pub dedup: Deduplicator,
    /// LLM router.
    pub router: Arc<ModelRouter>,
    /// Intent classifier (shared with the retriever).
    pub classifier: Arc<dyn IntentClassifier>,
    /// Default retrieval depth.
    pub top_k: usize,
    /// Retrieval confidence floor.
    pub min_confidence: f64,
    /// Silence threshold on the best composite score.
    pub silence_threshold: f64,
    /// Generation deadline.
    pub llm_timeout: Duration,
}

/// Per-turn state machine.
pub struct TurnOrchestrator {
    deps: OrchestratorDeps,
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator").finish_non_exhaustive()
    }
}

impl TurnOrchestrator {
    /// Create an orchestrator over shared dependencies.
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    /// Process one turn end to end.
    ///
    /// # Errors
    ///
    /// - Validation failures are returned before any side effect.
    /// - Retrieval failures degrade to an empty memory set (logged).
    /// - LLM failures are returned; no turn is persisted.
    /// - Persistence failures are returned; no detached work is scheduled.
    pub async fn process(&self, request: TurnRequest) -> Result<TurnResponse, EngineError> {
        let started = Instant::now();
        validate_request(&request)?;

        // 1. Resolve conversation (create or validate ownership).
        let conversation = match request.conversation_id {
            Some(id) => {
                self.deps
                    .conversations
                    .get(id, &request.user_id)
                    .await?
            }
            None => {
                self.deps
                    .conversations
                    .create(&request.user_id, None, Value::Object(Default::default()))
                    .await?
            }
        };
        let is_new_conversation = conversation.turn_count == 0;

        // 2. Retrieve. Failures degrade to an empty set.
        let retrieval_started = Instant::now();
        let outcome = if request.include_memories {
            let search = SearchRequest {
                user_id: request.user_id.clone(),
                query: request.message.clone(),
                top_k: self.deps.top_k,
                current_turn: request.turn_number,
                kind_filter: None,
                min_confidence: self.deps.min_confidence,
            };
            match self.deps.retriever.search(&search).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(user = %request.user_id, error = %err, "retrieval failed; continuing without memories");
                    self.empty_outcome(&request.message)
                }
            }
        } else {
            self.empty_outcome(&request.message)
        };
        let retrieval_ms = elapsed_ms(retrieval_started);

        // Silence mode: a good memory is silent when irrelevant.
        let inject = silence_verdict(&outcome, self.deps.silence_threshold);
        let active: Vec<ScoredMemory> = if inject {
            outcome.results.clone()
        } else {
            if !outcome.results.is_empty() {
                debug!(
                    best = outcome.best_score(),
                    threshold = self.deps.silence_threshold,
                    "silence mode active; discarding retrieved set"
                );
            }
            Vec::new()
        };

        // 3. Compose: system template + short-term tail + new message.
        let directive = self
            .directive_for(&outcome.intent, is_new_conversation, &request.user_id)
            .await;
        let system_prompt = prompt::render(&prompt::PromptContext {
            turn_number: request.turn_number,
            user_id: &request.user_id,
            memories: &active,
            silence: !inject,
            directive,
        });

        let mut messages: Vec<ChatMessage> = Vec::new();
        let tail = self
            .deps
            .conversations
            .tail(conversation.conversation_id, SHORT_TERM_TAIL_TURNS)
            .await?;
        for turn in &tail {
            messages.push(ChatMessage::user(turn.user_message.clone()));
            messages.push(ChatMessage::assistant(turn.assistant_message.clone()));
        }
        messages.push(ChatMessage::user(request.message.clone()));

        // 4. Generate. A failure here persists nothing.
        let generation_started = Instant::now();
        let completion = CompletionRequest {
            messages,
            system: Some(system_prompt),
            max_tokens: Some(GENERATION_MAX_TOKENS),
            temperature: Some(0.7),
        };
        let provider = self.deps.router.resolve(ROLE_CHAT);
        let response = tokio::time::timeout(self.deps.llm_timeout, provider.complete(completion))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "llm generation",
            })?
            .map_err(EngineError::from)?;
        let generation_ms = elapsed_ms(generation_started);

        // 5. Persist the turn; the response carries this turn_id.
        let persistence_started = Instant::now();
        let active_ids: Vec<Uuid> = active.iter().map(|m| m.memory.memory_id).collect();
        let turn = self
            .deps
            .conversations
            .append_turn(NewTurn {
                conversation_id: conversation.conversation_id,
                user_id: request.user_id.clone(),
                turn_number: request.turn_number,
                user_message: request.message.clone(),
                assistant_message: response.text.clone(),
                metadata: request.metadata.clone(),
                memories_retrieved: active_ids,
                memories_created: Vec::new(),
            })
            .await?;
        let persistence_ms = elapsed_ms(persistence_started);

        // 6. Detached side-effects: primitives only, own handles, failures
        //    never surface to the client.
        self.spawn_extraction(
            request.user_id.clone(),
            turn.turn_id,
            request.turn_number,
            request.message.clone(),
            response.text.clone(),
        );
        if is_new_conversation {
            self.spawn_title_generation(
                conversation.conversation_id,
                request.user_id.clone(),
                request.message.clone(),
            );
        }

        // 7. Respond.
        info!(
            user = %request.user_id,
            conversation = %conversation.conversation_id,
            turn = request.turn_number,
            memories = active.len(),
            "turn complete"
        );
        Ok(TurnResponse {
            turn_id: turn.turn_id,
            conversation_id: conversation.conversation_id,
            turn_number: request.turn_number,
            response: response.text,
            active_memories: active.iter().map(ActiveMemory::from_scored).collect(),
            latency: LatencyBreakdown {
                retrieval_ms,
                generation_ms,
                persistence_ms,
                total_ms: elapsed_ms(started),
            },
        })
    }

    fn empty_outcome(&self, query: &str) -> SearchOutcome {
        SearchOutcome {
            intent: self.deps.classifier.classify(query),
            results: Vec::new(),
        }
    }

    async fn directive_for(
        &self,
        intent: &QueryIntent,
        is_new_conversation: bool,
        user_id: &str,
    ) -> prompt::Directive {
        // The returning-user greeting needs the user's memory count; only
        // pay for the stats query when a greeting is actually possible.
        let known_memories = if intent.greeting && is_new_conversation {
            self.deps
                .store
                .stats(user_id)
                .await
                .map(|s| usize::try_from(s.total_memories).unwrap_or(0))
                .unwrap_or(0)
        } else {
            0
        };
        prompt::directive_for(intent, is_new_conversation, known_memories)
    }

    fn spawn_extraction(
        &self,
        user_id: String,
        turn_id: Uuid,
        turn_number: i64,
        user_message: String,
        assistant_message: String,
    ) {
        let store = Arc::clone(&self.deps.store);
        let conversations = Arc::clone(&self.deps.conversations);
        let extractor = Arc::clone(&self.deps.extractor);
        let canonicalizer = self.deps.canonicalizer;
        let dedup = self.deps.dedup;

        tokio::spawn(async move {
            run_extraction_pipeline(
                &store,
                &conversations,
                &extractor,
                canonicalizer,
                dedup,
                &user_id,
                turn_id,
                turn_number,
                &user_message,
                &assistant_message,
            )
            .await;
        });
    }

    fn spawn_title_generation(&self, conversation_id: Uuid, user_id: String, first_message: String) {
        let conversations = Arc::clone(&self.deps.conversations);
        let router = Arc::clone(&self.deps.router);

        tokio::spawn(async move {
            match title::generate_title(&router, &first_message).await {
                Ok(generated) => {
                    if let Err(err) = conversations
                        .update(conversation_id, &user_id, Some(&generated), None, None)
                        .await
                    {
                        warn!(conversation = %conversation_id, error = %err, "title update failed");
                    }
                }
                Err(err) => {
                    warn!(conversation = %conversation_id, error = %err, "title generation failed");
                }
            }
        });
    }
}

/// The detached write path: extract → canonicalize → dedup → create.
///
/// Every failure is logged and swallowed; partial success is expected.
#[allow(clippy::too_many_arguments)]
async fn run_extraction_pipeline(
    store: &MemoryStore,
    conversations: &ConversationStore,
    extractor: &MemoryExtractor,
    canonicalizer: Canonicalizer,
    dedup: Deduplicator,
    user_id: &str,
    turn_id: Uuid,
    turn_number: i64,
    user_message: &str,
    assistant_message: &str,
) {
    let candidates = extractor
        .extract(user_id, turn_number, user_message, assistant_message)
        .await;
    if candidates.is_empty() {
        return;
    }

    let embedder = store.embedder();
    let mut created_ids: Vec<Uuid> = Vec::new();

    for candidate in candidates {
        match canonicalizer
            .resolve(
                store,
                user_id,
                &candidate.content,
                candidate.kind,
                candidate.confidence,
                turn_number,
            )
            .await
        {
            Ok(CanonicalOutcome::UpdatedInPlace { memory_id }) => {
                debug!(memory_id = %memory_id, "canonical update; insert skipped");
                continue;
            }
            Ok(CanonicalOutcome::CreateNew) => {}
            Err(err) => {
                warn!(user = user_id, error = %err, "canonicalizer failed; attempting create");
            }
        }

        if dedup
            .is_duplicate(store, embedder.as_ref(), user_id, &candidate.content)
            .await
        {
            continue;
        }

        match store.create(candidate).await {
            Ok(memory) => created_ids.push(memory.memory_id),
            Err(EngineError::DuplicateMemory { .. }) => {
                debug!(user = user_id, "duplicate memory rejected by hash constraint");
            }
            Err(err) => {
                warn!(user = user_id, turn = turn_number, error = %err, "memory create failed");
            }
        }
    }

    if !created_ids.is_empty() {
        if let Err(err) = conversations
            .set_memories_created(turn_id, &created_ids)
            .await
        {
            warn!(turn = %turn_id, error = %err, "failed to record created memories on turn");
        }
        info!(
            user = user_id,
            turn = turn_number,
            created = created_ids.len(),
            "extraction pipeline stored memories"
        );
    }
}

fn validate_request(request: &TurnRequest) -> Result<(), EngineError> {
    if request.user_id.is_empty() {
        return Err(EngineError::Validation("user_id must be set".to_owned()));
    }
    let chars = request.message.chars().count();
    if chars == 0 || chars > crate::store::conversations::MAX_MESSAGE_CHARS {
        return Err(EngineError::Validation(format!(
            "message length {chars} outside 1..={}",
            crate::store::conversations::MAX_MESSAGE_CHARS
        )));
    }
    if request.turn_number < 0 {
        return Err(EngineError::Validation(
            "turn_number must be non-negative".to_owned(),
        ));
    }
    Ok(())
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
