//! Hybrid-scored memory retrieval.
//!
//! One search: classify intent, embed the query, pull `min(top_k*3, 50)`
//! candidates from the vector index scoped to the user, filter (kind,
//! confidence floor, COLD-tier similarity floor, index orphans), score with
//! the intent's weight profile, and truncate to `top_k`. Returned memories
//! are queued for deferred access accounting — the response path never waits
//! on counter updates.
//!
//! The silence verdict is a pure function of the scored results: when
//! nothing clears the threshold and the query is not comprehensive or
//! knowledge-seeking, long-term memory stays out of the prompt.

pub mod intent;
pub mod scoring;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::EngineError;
use crate::index::VectorIndex;
use crate::store::{ImportanceLevel, MemoryKind, MemoryStore};

use self::intent::{IntentClassifier, QueryIntent, QueryProfile};
use self::scoring::{
    composite_score, decay_penalty, recency_score, usage_score, MemoryTier, ScoreComponents,
    WeightProfile,
};

/// Upper bound on candidates fetched from the index per query.
const MAX_CANDIDATES: usize = 50;
/// Candidate oversampling factor before reranking.
const CANDIDATE_FACTOR: usize = 3;

/// Parameters for one retrieval.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Owner scope; only this user's memories are searched.
    pub user_id: String,
    /// Query text.
    pub query: String,
    /// Maximum results returned.
    pub top_k: usize,
    /// Current conversation turn (drives recency/tiering).
    pub current_turn: i64,
    /// Explicit kind filter; `None` lets intent-based defaults apply.
    pub kind_filter: Option<Vec<MemoryKind>>,
    /// Confidence floor for candidates.
    pub min_confidence: f64,
}

/// The memory fields retrieval exposes (no embedding).
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    /// Memory identifier.
    pub memory_id: Uuid,
    /// Memory kind.
    pub kind: MemoryKind,
    /// Content (index copy, truncated to 1000 chars).
    pub content: String,
    /// Turn of origin.
    pub source_turn: i64,
    /// Extraction confidence.
    pub confidence: f64,
    /// Importance weight.
    pub importance_score: f64,
    /// Importance band.
    pub importance_level: ImportanceLevel,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One scored retrieval result with its component scores.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// The retrieved memory.
    pub memory: RetrievedMemory,
    /// Composite relevance in [0, 1].
    pub relevance: f64,
    /// Component scores, for explainability.
    pub components: ScoreComponents,
    /// Admission tier at query time.
    pub tier: MemoryTier,
}

/// Result of one search: classification plus ranked memories.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Query intent.
    pub intent: QueryIntent,
    /// Ranked results, best first.
    pub results: Vec<ScoredMemory>,
}

impl SearchOutcome {
    /// Best composite score, or 0.0 for an empty result set.
    pub fn best_score(&self) -> f64 {
        self.results.first().map_or(0.0, |r| r.relevance)
    }

    /// Ids of the returned memories, in rank order.
    pub fn memory_ids(&self) -> Vec<Uuid> {
        self.results.iter().map(|r| r.memory.memory_id).collect()
    }
}

/// Silence verdict: should the retrieved set be injected into the prompt?
///
/// A pure function of the scored corpus — the same results and intent always
/// produce the same decision. Comprehensive requests ("tell me everything
/// you know about me") bypass the threshold: every memory is the answer.
/// Knowledge-seeking queries do not — "explain TCP congestion control"
/// against a corpus of cooking notes should stay silent and be answered
/// from general knowledge.
pub fn silence_verdict(outcome: &SearchOutcome, silence_threshold: f64) -> bool {
    if outcome.results.is_empty() {
        return false;
    }
    if outcome.intent.comprehensive {
        return true;
    }
    outcome.best_score() >= silence_threshold
}

/// Hybrid retrieval engine.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    store: Arc<MemoryStore>,
    classifier: Arc<dyn IntentClassifier>,
    cold_similarity_min: f64,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("cold_similarity_min", &self.cold_similarity_min)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Create a retriever.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        store: Arc<MemoryStore>,
        classifier: Arc<dyn IntentClassifier>,
        cold_similarity_min: f64,
    ) -> Self {
        Self {
            index,
            embedder,
            store,
            classifier,
            cold_similarity_min,
        }
    }

    /// Run one search.
    ///
    /// `top_k == 0` short-circuits before the embedder or index are touched.
    ///
    /// # Errors
    ///
    /// Returns embedder/index/store failures; the orchestrator degrades
    /// these to an empty memory set.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, EngineError> {
        let intent = self.classifier.classify(&request.query);

        if request.top_k == 0 {
            return Ok(SearchOutcome {
                intent,
                results: Vec::new(),
            });
        }

        let query_vector = self.embedder.embed(&request.query).await?;

        let candidate_count = request
            .top_k
            .saturating_mul(CANDIDATE_FACTOR)
            .min(MAX_CANDIDATES);
        let matches = self
            .index
            .query(&request.user_id, &query_vector, candidate_count)
            .await?;

        // Reject index orphans whose authoritative row is gone.
        let candidate_ids: Vec<Uuid> = matches.iter().map(|m| m.entry.memory_id).collect();
        let live_ids = self.store.existing_ids(&candidate_ids).await?;

        let weights = WeightProfile::for_profile(intent.profile);
        let kind_filter = effective_kind_filter(request, intent.profile);

        let mut results: Vec<ScoredMemory> = Vec::with_capacity(matches.len());
        for m in matches {
            if !live_ids.contains(&m.entry.memory_id) {
                debug!(memory_id = %m.entry.memory_id, "dropping index orphan");
                continue;
            }
            if let Some(filter) = &kind_filter {
                if !filter.contains(&m.entry.kind) {
                    continue;
                }
            }
            if m.entry.confidence < request.min_confidence {
                continue;
            }

            let turn_age = (request.current_turn - m.entry.source_turn).max(0);
            let tier = MemoryTier::for_age(turn_age);
            let similarity = f64::from(m.score);

            // COLD admission requires high similarity; bounds scan work at scale.
            if tier == MemoryTier::Cold && similarity < self.cold_similarity_min {
                continue;
            }

            let components = ScoreComponents {
                similarity,
                recency: recency_score(m.entry.source_turn, request.current_turn),
                usage: usage_score(m.entry.access_count),
                confidence: m.entry.confidence,
                conflict_penalty: if m.entry.conflicted { 1.0 } else { 0.0 },
                decay_penalty: decay_penalty(if request.current_turn > 0 { turn_age } else { 0 }),
            };

            results.push(ScoredMemory {
                relevance: composite_score(&components, &weights),
                components,
                tier,
                memory: RetrievedMemory {
                    memory_id: m.entry.memory_id,
                    kind: m.entry.kind,
                    content: m.entry.content,
                    source_turn: m.entry.source_turn,
                    confidence: m.entry.confidence,
                    importance_score: m.entry.importance_score,
                    importance_level: m.entry.importance_level,
                    created_at: m.entry.created_at,
                },
            });
        }

        results.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(request.top_k);

        info!(
            user = %request.user_id,
            profile = intent.profile.as_str(),
            count = results.len(),
            "retrieval complete"
        );

        let outcome = SearchOutcome { intent, results };

        // Deferred accounting; batched, never blocks this path.
        self.store
            .record_access(outcome.memory_ids(), request.current_turn);

        Ok(outcome)
    }
}

fn effective_kind_filter(
    request: &SearchRequest,
    profile: QueryProfile,
) -> Option<Vec<MemoryKind>> {
    if request.kind_filter.is_some() {
        return request.kind_filter.clone();
    }
    // Schedule queries care about what is planned, not who the user is.
    // Preferences stay in: call-time and meeting-time preferences are
    // schedule-relevant ("call me after 11 AM").
    if profile == QueryProfile::Schedule {
        return Some(vec![
            MemoryKind::Commitment,
            MemoryKind::Entity,
            MemoryKind::Preference,
        ]);
    }
    None
}
