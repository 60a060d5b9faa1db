//! Near-duplicate rejection before memory creation.
//!
//! Runs after the canonicalizer, before `create`. A candidate whose
//! embedding lands within `threshold` cosine similarity of any of the user's
//! recent memories is skipped. The check itself fails open: if the embedder
//! or the store is unavailable the create proceeds, and the
//! `(user_id, content_hash)` constraint remains the exact-equality backstop.

use tracing::{debug, warn};

use crate::embedding::{dot, Embedder};
use crate::store::MemoryStore;

/// Cosine-similarity deduplicator over a window of recent memories.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
    window: usize,
}

impl Deduplicator {
    /// Create a deduplicator with the given similarity threshold and
    /// recent-memory window.
    pub fn new(threshold: f64, window: usize) -> Self {
        Self { threshold, window }
    }

    /// Returns `true` when `content` is a near-duplicate of a recent memory.
    ///
    /// A threshold above 1.0 never rejects (cosine on unit vectors cannot
    /// exceed 1); threshold 1.0 only rejects exact-identical embeddings,
    /// which the hash constraint would catch anyway.
    pub async fn is_duplicate(
        &self,
        store: &MemoryStore,
        embedder: &dyn Embedder,
        user_id: &str,
        content: &str,
    ) -> bool {
        let candidate = match embedder.embed(content).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "dedup embedding failed; allowing create");
                return false;
            }
        };

        let recent = match store.recent(user_id, self.window).await {
            Ok(memories) => memories,
            Err(err) => {
                warn!(error = %err, "dedup window fetch failed; allowing create");
                return false;
            }
        };

        for memory in &recent {
            let similarity = f64::from(dot(&candidate, &memory.embedding));
            if similarity >= self.threshold {
                debug!(
                    similarity,
                    threshold = self.threshold,
                    existing = %memory.memory_id,
                    "near-duplicate candidate rejected"
                );
                return true;
            }
        }
        false
    }
}
