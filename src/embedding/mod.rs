//! Embedding generation.
//!
//! The [`Embedder`] trait abstracts over embedding providers. Two are
//! implemented: [`openai::OpenAiEmbedder`] (remote) and
//! [`ollama::OllamaEmbedder`] (local server, model loads lazily on the first
//! call). [`cache::EmbeddingCache`] wraps any embedder with a sharded
//! TTL-bounded cache keyed by content hash.
//!
//! All vectors leaving this module are unit-normalized, so callers may treat
//! dot product and cosine similarity as equivalent.

use async_trait::async_trait;

pub mod cache;
pub mod ollama;
pub mod openai;

/// Core embedding generation interface.
///
/// All implementations must be `Send + Sync` to allow shared use across
/// async task boundaries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate a unit-normalized embedding vector for the given text.
    ///
    /// Deterministic for identical input.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding provider is unreachable or the
    /// request fails. Failures are fatal to the calling operation; the
    /// embedder never retries silently.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Generate embeddings for multiple texts.
    ///
    /// The default implementation loops over [`Embedder::embed`]; providers
    /// with a batch endpoint override it with one coalesced call.
    ///
    /// # Errors
    ///
    /// Returns the first provider failure encountered.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Returns the dimensionality of the embedding vectors produced.
    fn dimensions(&self) -> usize;

    /// Stable `provider:model` tag used in cache keys.
    fn cache_tag(&self) -> String;
}

/// Errors from embedding generation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// HTTP transport failure.
    #[error("embedder request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not match expected format.
    #[error("embedder response parse error: {0}")]
    Parse(String),

    /// Provider is unavailable.
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
}

impl From<EmbedderError> for crate::error::EngineError {
    fn from(err: EmbedderError) -> Self {
        match &err {
            EmbedderError::Request(e) if e.is_timeout() => Self::Timeout {
                operation: "embedding",
            },
            _ => Self::DependencyUnavailable {
                dependency: "embedder",
                message: err.to_string(),
            },
        }
    }
}

/// Normalize a vector to unit length in place.
///
/// Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Dot product of two vectors.
///
/// On unit-normalized inputs this equals cosine similarity. Mismatched
/// lengths score the overlapping prefix only.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
