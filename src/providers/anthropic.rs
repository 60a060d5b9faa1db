//! Anthropic messages API provider.

use serde_json::{json, Value};

use super::{
    check_http_response, http_client, CompletionRequest, CompletionResponse, LlmProvider,
    ProviderError, Role, TokenUsage,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic `/v1/messages` provider.
pub struct AnthropicProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
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
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                json!({
                    "role": anthropic_role(message.role),
                    "content": message.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(ANTHROPIC_API_BASE)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(CompletionResponse {
            text: parse_content_text(&parsed)?,
            model: parsed
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.model)
                .to_owned(),
            usage: parse_usage(&parsed),
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn anthropic_role(role: Role) -> &'static str {
    match role {
        // The messages API takes the system prompt as a top-level field.
        Role::System | Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_content_text(value: &Value) -> Result<String, ProviderError> {
    let Some(content_items) = value.get("content").and_then(Value::as_array) else {
        return Err(ProviderError::Parse("missing content array".to_owned()));
    };

    let mut text = String::new();
    for item in content_items {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        if item_type == "text" {
            let part = item.get("text").and_then(Value::as_str).unwrap_or_default();
            text.push_str(part);
        }
    }

    Ok(text)
}

fn parse_usage(value: &Value) -> TokenUsage {
    let Some(usage) = value.get("usage") else {
        return TokenUsage::default();
    };
    TokenUsage {
        input_tokens: usage
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}
