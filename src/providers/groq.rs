//! Groq provider.
//!
//! Groq serves OpenAI-compatible chat completions at its own base URL, so
//! this provider reuses the OpenAI wire protocol.

use super::openai::complete_openai_compatible;
use super::{http_client, CompletionRequest, CompletionResponse, LlmProvider, ProviderError};

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Groq chat-completions provider.
pub struct GroqProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GroqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GroqProvider {
    /// Create a provider for the given model and API key.
    pub fn new(model: &str, api_key: &str, timeout_secs: u64) -> Self {
        Self {
            model: model.to_owned(),
            api_key: api_key.to_owned(),
            client: http_client(timeout_secs),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for GroqProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        complete_openai_compatible(
            &self.client,
            GROQ_API_BASE,
            &self.api_key,
            &self.model,
            request,
        )
        .await
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
