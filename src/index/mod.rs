//! Vector index over memory embeddings.
//!
//! The index is a **derived cache**: the row store is authoritative, and
//! [`crate::store::MemoryStore::reconcile_index`] rebuilds the index from
//! rows after startup or a failed upsert. Index rows carry the filterable
//! metadata retrieval needs so scoring does not touch the row store; the
//! metadata may be slightly stale (access counts), which scoring tolerates.
//!
//! Every query filters on `user_id` before any similarity math.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::embedding::dot;
use crate::error::EngineError;
use crate::store::{ImportanceLevel, Memory, MemoryKind};

/// Maximum content length mirrored into index metadata.
const INDEX_CONTENT_CHARS: usize = 1000;

/// A row in the vector index: embedding plus filterable metadata.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Memory identifier (index key).
    pub memory_id: Uuid,
    /// Owner scope; every query filters on it.
    pub user_id: String,
    /// Memory kind.
    pub kind: MemoryKind,
    /// Content truncated to 1000 chars.
    pub content: String,
    /// Turn of origin.
    pub source_turn: i64,
    /// Extraction confidence.
    pub confidence: f64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Access count at last upsert (may lag the row store).
    pub access_count: i64,
    /// Importance weight.
    pub importance_score: f64,
    /// Importance band.
    pub importance_level: ImportanceLevel,
    /// Whether the memory context carried a conflict annotation.
    pub conflicted: bool,
    /// Unit-norm embedding.
    pub vector: Vec<f32>,
}

impl IndexEntry {
    /// Build an index entry from a stored memory.
    pub fn from_memory(memory: &Memory) -> Self {
        Self {
            memory_id: memory.memory_id,
            user_id: memory.user_id.clone(),
            kind: memory.kind,
            content: memory.content.chars().take(INDEX_CONTENT_CHARS).collect(),
            source_turn: memory.source_turn,
            confidence: memory.confidence,
            created_at: memory.created_at,
            access_count: memory.access_count,
            importance_score: memory.importance_score,
            importance_level: memory.importance_level,
            conflicted: memory.is_conflicted(),
            vector: memory.embedding.clone(),
        }
    }
}

/// A similarity match returned by a query.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    /// The matched entry.
    pub entry: IndexEntry,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Approximate-nearest-neighbor store interface.
///
/// Calls are stateless; the orchestrator shares one client across tasks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace an entry keyed by `memory_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index rejects the write.
    async fn upsert(&self, entry: IndexEntry) -> Result<(), EngineError>;

    /// Top-`limit` entries for `user_id` by similarity to `vector`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index is unreachable.
    async fn query(
        &self,
        user_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexMatch>, EngineError>;

    /// Remove one entry. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the index rejects the delete.
    async fn remove(&self, memory_id: Uuid) -> Result<(), EngineError>;

    /// Remove every entry owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index rejects the delete.
    async fn remove_user(&self, user_id: &str) -> Result<(), EngineError>;

    /// Total entries across all users.
    fn len(&self) -> usize;

    /// Returns `true` when the index holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process exact-scan index with per-user postings.
///
/// Postings are sharded by user in a [`DashMap`]; a query locks only its
/// user's posting list. Scan cost is bounded upstream by retrieval tiering
/// (COLD memories need a high similarity floor to be admitted at all).
#[derive(Debug, Default)]
pub struct FlatIndex {
    postings: DashMap<String, Vec<IndexEntry>>,
    owners: DashMap<Uuid, String>,
}

impl FlatIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), EngineError> {
        // A memory never changes owner, but a replace must not leave a stale
        // posting behind if it somehow did.
        if let Some(previous_owner) = self.owners.get(&entry.memory_id) {
            if *previous_owner != entry.user_id {
                let key = previous_owner.clone();
                drop(previous_owner);
                if let Some(mut list) = self.postings.get_mut(&key) {
                    list.retain(|e| e.memory_id != entry.memory_id);
                }
            }
        }

        self.owners.insert(entry.memory_id, entry.user_id.clone());
        let mut list = self.postings.entry(entry.user_id.clone()).or_default();
        if let Some(existing) = list.iter_mut().find(|e| e.memory_id == entry.memory_id) {
            *existing = entry;
        } else {
            list.push(entry);
        }
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexMatch>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(list) = self.postings.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<IndexMatch> = list
            .iter()
            .map(|entry| IndexMatch {
                score: dot(&entry.vector, vector),
                entry: entry.clone(),
            })
            .collect();
        drop(list);

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn remove(&self, memory_id: Uuid) -> Result<(), EngineError> {
        if let Some((_, user_id)) = self.owners.remove(&memory_id) {
            if let Some(mut list) = self.postings.get_mut(&user_id) {
                list.retain(|e| e.memory_id != memory_id);
            }
        }
        Ok(())
    }

    async fn remove_user(&self, user_id: &str) -> Result<(), EngineError> {
        if let Some((_, list)) = self.postings.remove(user_id) {
            for entry in list {
                self.owners.remove(&entry.memory_id);
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.owners.len()
    }
}
