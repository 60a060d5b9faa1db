//! Persistence layer: domain types, authoritative SQLite row store, and the
//! deferred access-accounting actor.
//!
//! All reads go through the connection pool (concurrent). Memory creation
//! and deletion are request-path operations on the pool; `access_count` /
//! `last_used_turn` bookkeeping flows through a single-writer actor backed
//! by an [`mpsc`](tokio::sync::mpsc) channel so retrieval never blocks on
//! usage updates.

pub mod access;
pub mod conversations;
pub mod memories;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::EngineError;

pub use self::conversations::{
    Conversation, ConversationExport, ConversationStore, ConversationTurn, NewTurn,
};
pub use self::memories::MemoryStore;

/// Maximum memory content length in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Kind of memory stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// User likes, dislikes, habits.
    Preference,
    /// Verifiable statement about the user.
    Fact,
    /// Promise, schedule entry, task, deadline.
    Commitment,
    /// Standing order for how to interact.
    Instruction,
    /// Person, place, or organization worth tracking.
    Entity,
}

impl MemoryKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Commitment => "commitment",
            Self::Instruction => "instruction",
            Self::Entity => "entity",
        }
    }

    /// Parse from a stored or extractor-supplied value (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised kind.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_ascii_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "commitment" => Ok(Self::Commitment),
            "instruction" => Ok(Self::Instruction),
            "entity" => Ok(Self::Entity),
            other => Err(EngineError::Validation(format!(
                "invalid memory kind {other:?}"
            ))),
        }
    }

    /// All kinds, in storage order.
    pub fn all() -> [Self; 5] {
        [
            Self::Preference,
            Self::Fact,
            Self::Commitment,
            Self::Instruction,
            Self::Entity,
        ]
    }
}

/// Importance bands controlling expiry and decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    /// Identity, goals, relationships. Never expires, never decays.
    Critical,
    /// Preferences, skills, commitments. Slow decay.
    High,
    /// Facts and interests. Normal decay.
    Medium,
    /// Small talk, temporary info. Fast decay.
    Low,
}

impl ImportanceLevel {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Parse from a stored value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised level.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(EngineError::Validation(format!(
                "invalid importance level {other:?}"
            ))),
        }
    }
}

/// Open key-value context attached to a memory.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// The durable unit of remembered information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Globally unique identifier.
    pub memory_id: Uuid,
    /// Opaque owner scope; all storage and retrieval is partitioned by it.
    pub user_id: String,
    /// Memory kind.
    pub kind: MemoryKind,
    /// UTF-8 content, 1–5000 chars.
    pub content: String,
    /// Hash of lowercased, trimmed content for exact-duplicate rejection.
    pub content_hash: String,
    /// Unit-norm embedding of `content`.
    pub embedding: Vec<f32>,
    /// Turn number when first created (or last canonical update).
    pub source_turn: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last retrieval timestamp.
    pub last_accessed: DateTime<Utc>,
    /// Monotonically non-decreasing retrieval count.
    pub access_count: i64,
    /// Extractor-assigned quality of the claim, in [0, 1].
    pub confidence: f64,
    /// Importance weight in [0, 1].
    pub importance_score: f64,
    /// Importance band.
    pub importance_level: ImportanceLevel,
    /// Cached temporal decay factor in [0, 1].
    pub decay_score: f64,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Entities mentioned in the content.
    pub entities: Vec<String>,
    /// Open key-value context (`scheduled_date`, `supersedes`, ...).
    pub context: Context,
    /// Turn of the last retrieval that surfaced this memory.
    pub last_used_turn: Option<i64>,
}

impl Memory {
    /// Returns `true` when the context carries a conflict annotation.
    pub fn is_conflicted(&self) -> bool {
        self.context.contains_key("potential_conflict")
            || self.context.contains_key("superseded_by")
    }

    /// Recompute the temporal decay score for a given turn.
    ///
    /// Exponential decay over turn age with an access-pattern boost;
    /// `critical` memories do not decay.
    pub fn compute_decay(&self, current_turn: i64) -> f64 {
        if self.importance_level == ImportanceLevel::Critical {
            return 1.0;
        }
        let age = (current_turn - self.source_turn).max(0) as f64;
        let access_boost = ((self.access_count as f64) * 0.1).min(0.5);
        let base = 0.95_f64.powf(age / 100.0);
        (base + access_boost).min(1.0)
    }
}

/// Input for creating a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    /// Owner scope.
    pub user_id: String,
    /// Memory kind.
    pub kind: MemoryKind,
    /// Content, 1–5000 chars.
    pub content: String,
    /// Turn number of origin.
    pub source_turn: i64,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entities mentioned.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Open key-value context.
    #[serde(default)]
    pub context: Context,
}

impl NewMemory {
    /// Validate content length, user scope, and confidence range.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] on out-of-range input.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.user_id.is_empty() {
            return Err(EngineError::Validation("user_id must be set".to_owned()));
        }
        let chars = self.content.chars().count();
        if chars == 0 || chars > MAX_CONTENT_CHARS {
            return Err(EngineError::Validation(format!(
                "content length {chars} outside 1..={MAX_CONTENT_CHARS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngineError::Validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.source_turn < 0 {
            return Err(EngineError::Validation(
                "source_turn must be non-negative".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Partial update for an existing memory.
///
/// `update` re-embeds only when `content` is set. Canonical updates also set
/// `source_turn` and replace `context`, preserving the memory id so earlier
/// turn-record references stay valid.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    /// Replacement content (triggers re-embedding and re-hashing).
    pub content: Option<String>,
    /// Replacement confidence.
    pub confidence: Option<f64>,
    /// Replacement source turn.
    pub source_turn: Option<i64>,
    /// Replacement tags.
    pub tags: Option<Vec<String>>,
    /// Replacement entities.
    pub entities: Option<Vec<String>>,
    /// Replacement context map.
    pub context: Option<Context>,
    /// Replacement importance (score, level).
    pub importance: Option<(f64, ImportanceLevel)>,
}

impl MemoryPatch {
    /// Returns `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.confidence.is_none()
            && self.source_turn.is_none()
            && self.tags.is_none()
            && self.entities.is_none()
            && self.context.is_none()
            && self.importance.is_none()
    }
}

/// Aggregate statistics over one user's memory space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Owner scope.
    pub user_id: String,
    /// Total live memories.
    pub total_memories: i64,
    /// Count per kind.
    pub by_kind: Vec<(MemoryKind, i64)>,
    /// Mean confidence across all memories.
    pub avg_confidence: f64,
    /// Earliest source turn.
    pub oldest_turn: i64,
    /// Latest source turn.
    pub newest_turn: i64,
    /// Sum of access counts.
    pub total_accesses: i64,
    /// Memories with at least 5 accesses.
    pub hot_memories: i64,
}

// ---------------------------------------------------------------------------
// Helpers shared by the row stores
// ---------------------------------------------------------------------------

/// Hash of lowercased, whitespace-trimmed content.
///
/// Backs the `(user_id, content_hash)` uniqueness constraint.
pub fn content_hash(content: &str) -> String {
    let normalized = content.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Fixed-width so lexicographic order on the TEXT column is chronological.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Internal(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(raw).map_err(|e| EngineError::Internal(format!("bad uuid {raw:?}: {e}")))
}

pub(crate) fn parse_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn parse_context(raw: &str) -> Context {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn parse_uuid_list(raw: &str) -> Vec<Uuid> {
    let strings: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
    strings
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

pub(crate) fn uuid_list_json(ids: &[Uuid]) -> String {
    let strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    serde_json::to_string(&strings).unwrap_or_else(|_| "[]".to_owned())
}

pub(crate) fn embedding_json(vector: &[f32]) -> String {
    serde_json::to_string(vector).unwrap_or_else(|_| "[]".to_owned())
}

pub(crate) fn parse_embedding(raw: &str) -> Vec<f32> {
    serde_json::from_str(raw).unwrap_or_default()
}
