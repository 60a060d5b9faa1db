//! Ollama-based local embedder using the `/api/embed` endpoint.
//!
//! Initialization is lazy: the first call makes the server load the model
//! (verified once through a [`tokio::sync::OnceCell`] warm-up); subsequent
//! calls reuse the loaded model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use super::{normalize, Embedder, EmbedderError};
use crate::providers::http_client;

/// Ollama embedder calling `POST {base_url}/api/embed`.
pub struct OllamaEmbedder {
    model: String,
    base_url: String,
    dims: usize,
    client: reqwest::Client,
    warmed: OnceCell<()>,
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbedder {
    /// Create an Ollama embedder for the given model.
    ///
    /// `dims` is the expected dimensionality of embeddings (e.g. 768 for
    /// nomic-embed-text). The model is not loaded until the first call.
    pub fn new(model: &str, base_url: &str, dims: usize, timeout_secs: u64) -> Self {
        Self {
            model: model.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            dims,
            client: http_client(timeout_secs),
            warmed: OnceCell::new(),
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Unavailable(format!(
                "ollama returned {status}: {body_text}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Parse(e.to_string()))?;

        if parsed.embeddings.len() != inputs.len() {
            return Err(EmbedderError::Parse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.embeddings.len()
            )));
        }

        let mut vectors = parsed.embeddings;
        for vector in &mut vectors {
            normalize(vector);
        }
        Ok(vectors)
    }

    /// First call forces the server to load the model; later calls reuse it.
    async fn ensure_warm(&self) -> Result<(), EmbedderError> {
        self.warmed
            .get_or_try_init(|| async {
                self.request(&["warmup".to_owned()]).await?;
                info!(model = %self.model, "ollama embedding model loaded");
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.ensure_warm().await?;
        let vectors = self.request(std::slice::from_ref(&text.to_owned())).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::Parse("empty embeddings array".to_owned()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_warm().await?;
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn cache_tag(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
