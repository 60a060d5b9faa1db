//! Model router resolving providers by role.
//!
//! The configured provider serves every role by default. The `extraction`
//! role (and `title`, which shares its model) can be pointed at a cheaper
//! model of the same provider via `MNEMON_EXTRACTION_MODEL`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::EngineError;

use super::anthropic::AnthropicProvider;
use super::groq::GroqProvider;
use super::openai::OpenAiProvider;
use super::LlmProvider;

/// Role used for turn generation.
pub const ROLE_CHAT: &str = "chat";
/// Role used for memory extraction and adjudication calls.
pub const ROLE_EXTRACTION: &str = "extraction";
/// Role used for conversation title generation.
pub const ROLE_TITLE: &str = "title";

/// Resolves an [`LlmProvider`] for each role.
#[derive(Clone)]
pub struct ModelRouter {
    default: Arc<dyn LlmProvider>,
    role_overrides: HashMap<String, Arc<dyn LlmProvider>>,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("default", &self.default.model_id())
            .field("roles", &self.role_overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRouter {
    /// Build a router from LLM configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the selected provider has no
    /// API key configured.
    pub fn from_config(config: &LlmConfig) -> Result<Self, EngineError> {
        let default = instantiate(config, default_model(config))?;

        let mut role_overrides: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        if let Some(extraction_model) = &config.extraction_model {
            let provider = instantiate(config, extraction_model)?;
            role_overrides.insert(ROLE_EXTRACTION.to_owned(), Arc::clone(&provider));
            role_overrides.insert(ROLE_TITLE.to_owned(), provider);
        }

        Ok(Self {
            default,
            role_overrides,
        })
    }

    /// Create a router backed by a single provider for integration tests.
    #[doc(hidden)]
    pub fn for_testing(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            default: provider,
            role_overrides: HashMap::new(),
        }
    }

    /// Resolve the provider for a role, falling back to the default.
    pub fn resolve(&self, role: &str) -> Arc<dyn LlmProvider> {
        self.role_overrides
            .get(role)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    /// Returns the default provider.
    pub fn default_provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.default)
    }
}

fn default_model(config: &LlmConfig) -> &str {
    match config.provider {
        LlmProviderKind::OpenAi => &config.openai_model,
        LlmProviderKind::Anthropic => &config.anthropic_model,
        LlmProviderKind::Groq => &config.groq_model,
    }
}

fn instantiate(config: &LlmConfig, model: &str) -> Result<Arc<dyn LlmProvider>, EngineError> {
    let missing_key = |name: &str| {
        EngineError::Validation(format!(
            "llm provider {:?} selected but {name} is not set",
            config.provider
        ))
    };

    match config.provider {
        LlmProviderKind::OpenAi => {
            let key = config
                .openai_api_key
                .as_deref()
                .ok_or_else(|| missing_key("OPENAI_API_KEY"))?;
            Ok(Arc::new(OpenAiProvider::new(
                model,
                key,
                config.timeout_secs,
            )))
        }
        LlmProviderKind::Anthropic => {
            let key = config
                .anthropic_api_key
                .as_deref()
                .ok_or_else(|| missing_key("ANTHROPIC_API_KEY"))?;
            Ok(Arc::new(AnthropicProvider::new(
                model,
                key,
                config.timeout_secs,
            )))
        }
        LlmProviderKind::Groq => {
            let key = config
                .groq_api_key
                .as_deref()
                .ok_or_else(|| missing_key("GROQ_API_KEY"))?;
            Ok(Arc::new(GroqProvider::new(model, key, config.timeout_secs)))
        }
    }
}
