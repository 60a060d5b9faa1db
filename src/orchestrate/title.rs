//! Conversation title generation.
//!
//! Runs detached after the first turn of a new conversation. Best-effort: a
//! failure leaves the placeholder title in place.

use crate::error::EngineError;
use crate::providers::router::{ModelRouter, ROLE_TITLE};
use crate::providers::{ChatMessage, CompletionRequest};

/// Maximum title length in characters.
const MAX_TITLE_CHARS: usize = 60;

/// Generate a short title from the conversation's first user message.
///
/// # Errors
///
/// Returns provider failures; callers fall back to the placeholder title.
pub async fn generate_title(
    router: &ModelRouter,
    first_message: &str,
) -> Result<String, EngineError> {
    let request = CompletionRequest {
        messages: vec![ChatMessage::user(format!(
            "Generate a title for a conversation that starts with this message:\n\n{first_message}"
        ))],
        system: Some(
            "Generate a concise conversation title of at most six words. \
             Return only the title, no quotes or punctuation around it."
                .to_owned(),
        ),
        max_tokens: Some(32),
        temperature: Some(0.3),
    };

    let response = router
        .resolve(ROLE_TITLE)
        .complete(request)
        .await
        .map_err(EngineError::from)?;

    let title: String = response
        .text
        .trim()
        .trim_matches('"')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();

    if title.is_empty() {
        return Err(EngineError::Internal("empty title generated".to_owned()));
    }
    Ok(title)
}
