//! OpenAI embeddings provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{normalize, Embedder, EmbedderError};
use crate::providers::http_client;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// OpenAI `/v1/embeddings` embedder.
pub struct OpenAiEmbedder {
    model: String,
    api_key: String,
    dims: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Create an embedder for the given model and expected dimensionality.
    pub fn new(model: &str, api_key: &str, dims: usize, timeout_secs: u64) -> Self {
        Self {
            model: model.to_owned(),
            api_key: api_key.to_owned(),
            dims,
            client: http_client(timeout_secs),
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Unavailable(format!(
                "openai returned {status}: {body_text}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Parse(e.to_string()))?;

        if parsed.data.len() != inputs.len() {
            return Err(EmbedderError::Parse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        let mut vectors: Vec<Vec<f32>> =
            parsed.data.into_iter().map(|item| item.embedding).collect();
        for vector in &mut vectors {
            normalize(vector);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
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
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn cache_tag(&self) -> String {
        format!("openai:{}", self.model)
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
    data: Vec<EmbedItem>,
}

#[derive(Debug, Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
}
