//! OpenAI chat-completions provider.
//!
//! The wire types are shared with [`super::groq`], which speaks the same
//! OpenAI-compatible protocol against a different base URL.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    check_http_response, http_client, CompletionRequest, CompletionResponse, LlmProvider,
    ProviderError, Role, TokenUsage,
};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI `/v1/chat/completions` provider.
pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Create a provider for the given model and API key.
    pub fn new(model: &str, api_key: &str, timeout_secs: u64) -> Self {
        Self::with_base_url(model, api_key, OPENAI_API_BASE, timeout_secs)
    }

    /// Create a provider against a custom OpenAI-compatible base URL.
    pub fn with_base_url(model: &str, api_key: &str, base_url: &str, timeout_secs: u64) -> Self {
        Self {
            model: model.to_owned(),
            api_key: api_key.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: http_client(timeout_secs),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        complete_openai_compatible(
            &self.client,
            &self.base_url,
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

/// Issue an OpenAI-format chat completion against `{base_url}/chat/completions`.
pub(super) async fn complete_openai_compatible(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    request: CompletionRequest,
) -> Result<CompletionResponse, ProviderError> {
    let mut messages: Vec<WireMessage> = Vec::with_capacity(request.messages.len().saturating_add(1));
    if let Some(system) = &request.system {
        messages.push(WireMessage {
            role: "system".to_owned(),
            content: system.clone(),
        });
    }
    for message in &request.messages {
        messages.push(WireMessage {
            role: wire_role(message.role).to_owned(),
            content: message.content.clone(),
        });
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    let response = client
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let payload = check_http_response(response).await?;
    let parsed: WireResponse =
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("empty choices array".to_owned()))?;

    Ok(CompletionResponse {
        text: choice.message.content,
        model: parsed.model,
        usage: parsed.usage.map(TokenUsage::from).unwrap_or_default(),
    })
}

fn wire_role(role: Role) -> &'static str {
    role.as_str()
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}
