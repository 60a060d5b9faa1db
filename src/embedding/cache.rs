//! TTL-bounded embedding cache.
//!
//! Keys are `sha256(provider:model:text)` so switching providers or models
//! never serves stale vectors. The map is sharded ([`DashMap`]) — requests
//! are not serialized through a single lock. Batch lookups coalesce all
//! misses into one provider call and write results back individually.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Embedder, EmbedderError};

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Caching wrapper around any [`Embedder`].
pub struct EmbeddingCache {
    inner: std::sync::Arc<dyn Embedder>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    tag: String,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("tag", &self.tag)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    /// Wrap an embedder with a TTL-bounded cache.
    pub fn new(inner: std::sync::Arc<dyn Embedder>, ttl: Duration) -> Self {
        let tag = inner.cache_tag();
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
            tag,
        }
    }

    /// Number of live cache entries (expired entries may still be counted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tag.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.vector.clone())
    }

    fn insert(&self, key: String, vector: Vec<f32>) {
        self.entries.insert(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl Embedder for EmbeddingCache {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let key = self.cache_key(text);
        if let Some(vector) = self.lookup(&key) {
            debug!(len = text.len(), "embedding cache hit");
            return Ok(vector);
        }

        let vector = self.inner.embed(text).await?;
        self.insert(key, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (idx, text) in texts.iter().enumerate() {
            let key = self.cache_key(text);
            match self.lookup(&key) {
                Some(vector) => results.push(Some(vector)),
                None => {
                    results.push(None);
                    miss_indices.push(idx);
                    miss_texts.push(text.clone());
                }
            }
        }

        // One provider call for all misses; results written back one by one.
        if !miss_texts.is_empty() {
            let vectors = self.inner.embed_batch(&miss_texts).await?;
            for (slot, (text, vector)) in miss_indices
                .iter()
                .zip(miss_texts.iter().zip(vectors.into_iter()))
            {
                self.insert(self.cache_key(text), vector.clone());
                results[*slot] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn cache_tag(&self) -> String {
        self.tag.clone()
    }
}
