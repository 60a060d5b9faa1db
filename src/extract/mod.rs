//! Extraction pipeline: mining durable memories from dialogue turns.
//!
//! [`MemoryExtractor`] prompts a constrained LLM per turn and parses its
//! output defensively — a raw JSON array, a fenced block, and a
//! `{"memories": [...]}` wrapper are all accepted. Candidates below the
//! confidence threshold are dropped, relative dates are rewritten to
//! absolute ones, and message snippets are attached as context. An LLM
//! failure or unparseable output yields zero memories and never blocks the
//! turn.
//!
//! Downstream of extraction, [`canonical`] folds evolving preferences into
//! one memory, [`dedup`] rejects near-duplicates, and [`importance`] assigns
//! initial weights.

pub mod canonical;
pub mod dedup;
pub mod importance;
pub mod temporal;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::providers::router::{ModelRouter, ROLE_EXTRACTION};
use crate::providers::{ChatMessage, CompletionRequest};
use crate::store::{Context, MemoryKind, NewMemory};

/// Characters of each message kept as context on an extracted memory.
const CONTEXT_SNIPPET_CHARS: usize = 200;

/// Maximum tokens for an extraction response.
const EXTRACTION_MAX_TOKENS: u32 = 2048;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are a memory extraction system for a long-term conversational memory engine.
Analyze one conversation turn and identify information worth remembering across
future conversations.

Memory types:
- \"preference\": likes, dislikes, habits (\"I prefer morning calls\")
- \"fact\": verifiable statements about the user (\"I work at Google\")
- \"commitment\": promises, schedules, meetings, tasks (\"Meeting at 3 PM tomorrow\")
- \"instruction\": standing orders for how to interact (\"Always respond in Spanish\")
- \"entity\": important people, places, organizations (\"My fiancee Alex\")

Do not extract: casual filler, questions without information, temporary context,
the assistant's own responses, or information that is obviously redundant.

Confidence is a calibrated estimate, not a default:
1.0 explicit and unambiguous; 0.9 clear but context-dependent; 0.8 strong
inference; 0.7 reasonable guess; 0.6 weak signal. Below 0.6, do not extract.

Return ONLY valid JSON in this shape:
{\"memories\": [{\"type\": \"preference\", \"content\": \"...\", \"confidence\": 0.85,
\"tags\": [\"...\"], \"entities\": [\"...\"]}]}

If nothing is worth remembering, return {\"memories\": []}.
Typical yield is 0-3 memories per turn. Be selective.";

/// A single raw extraction candidate as emitted by the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandidate {
    /// Memory type label (any case).
    #[serde(rename = "type")]
    pub kind: String,
    /// Candidate content.
    pub content: String,
    /// Calibrated confidence.
    pub confidence: f64,
    /// Tags for retrieval.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entities mentioned.
    #[serde(default)]
    pub entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractionPayload {
    List(Vec<RawCandidate>),
    Wrapped {
        memories: Vec<RawCandidate>,
    },
}

/// Turn-level memory extractor backed by the extraction-role model.
pub struct MemoryExtractor {
    router: Arc<ModelRouter>,
    confidence_threshold: f64,
}

impl std::fmt::Debug for MemoryExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryExtractor")
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}

impl MemoryExtractor {
    /// Create an extractor resolving models through `router`.
    pub fn new(router: Arc<ModelRouter>, confidence_threshold: f64) -> Self {
        Self {
            router,
            confidence_threshold,
        }
    }

    /// Extract zero or more candidate memories from one turn.
    ///
    /// Never fails: provider errors and unparseable output are logged and
    /// yield an empty list.
    pub async fn extract(
        &self,
        user_id: &str,
        turn_number: i64,
        user_message: &str,
        assistant_message: &str,
    ) -> Vec<NewMemory> {
        let prompt = format!(
            "Analyze this conversation turn and extract important memories.\n\n\
             Turn #{turn_number}:\nUser: {user_message}\nAssistant: {assistant_message}"
        );

        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            system: Some(EXTRACTION_SYSTEM_PROMPT.to_owned()),
            max_tokens: Some(EXTRACTION_MAX_TOKENS),
            temperature: Some(0.1),
        };

        let provider = self.router.resolve(ROLE_EXTRACTION);
        let response = match provider.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(user = user_id, turn = turn_number, error = %err, "extraction LLM call failed");
                return Vec::new();
            }
        };

        let candidates = parse_candidates(&response.text);
        let now = Utc::now();
        let memories: Vec<NewMemory> = candidates
            .into_iter()
            .filter_map(|candidate| {
                self.candidate_to_memory(candidate, user_id, turn_number, user_message, assistant_message, now)
            })
            .collect();

        debug!(
            user = user_id,
            turn = turn_number,
            count = memories.len(),
            "extraction complete"
        );
        memories
    }

    fn candidate_to_memory(
        &self,
        candidate: RawCandidate,
        user_id: &str,
        turn_number: i64,
        user_message: &str,
        assistant_message: &str,
        now: DateTime<Utc>,
    ) -> Option<NewMemory> {
        let kind = match MemoryKind::parse(&candidate.kind) {
            Ok(kind) => kind,
            Err(_) => {
                debug!(kind = %candidate.kind, "skipping candidate with unknown type");
                return None;
            }
        };

        if candidate.confidence < self.confidence_threshold {
            debug!(
                confidence = candidate.confidence,
                threshold = self.confidence_threshold,
                "skipping low-confidence candidate"
            );
            return None;
        }
        if candidate.content.trim().is_empty() {
            return None;
        }

        let (content, scheduled_date) = temporal::rewrite_temporal(&candidate.content, now);

        let mut context = Context::new();
        context.insert(
            "user_message".to_owned(),
            serde_json::Value::String(snippet(user_message)),
        );
        context.insert(
            "assistant_message".to_owned(),
            serde_json::Value::String(snippet(assistant_message)),
        );
        context.insert(
            "extraction_time".to_owned(),
            serde_json::Value::String(now.to_rfc3339()),
        );
        if let Some(scheduled) = scheduled_date {
            context.insert(
                "scheduled_date".to_owned(),
                serde_json::Value::String(scheduled.to_rfc3339()),
            );
        }

        Some(NewMemory {
            user_id: user_id.to_owned(),
            kind,
            content,
            source_turn: turn_number,
            confidence: candidate.confidence.clamp(0.0, 1.0),
            tags: candidate.tags,
            entities: candidate.entities,
            context,
        })
    }

    /// Merge several related memory contents into one statement.
    ///
    /// Used by the lifecycle worker's consolidation pass. Returns `None`
    /// when fewer than two contents are supplied.
    ///
    /// # Errors
    ///
    /// Returns provider failures; the caller treats them as best-effort.
    pub async fn consolidate(&self, contents: &[String]) -> Result<Option<String>, EngineError> {
        if contents.len() < 2 {
            return Ok(None);
        }

        let listing = contents
            .iter()
            .enumerate()
            .map(|(i, content)| format!("{}. {content}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest {
            messages: vec![ChatMessage::user(format!(
                "Consolidate these memories:\n{listing}"
            ))],
            system: Some(
                "Consolidate multiple related memories into a single, comprehensive memory. \
                 Preserve all important information while removing redundancy. \
                 Return only the consolidated memory text."
                    .to_owned(),
            ),
            max_tokens: Some(512),
            temperature: Some(0.1),
        };

        let provider = self.router.resolve(ROLE_EXTRACTION);
        let response = provider.complete(request).await.map_err(EngineError::from)?;
        let merged = response.text.trim().to_owned();
        if merged.is_empty() {
            return Ok(None);
        }
        Ok(Some(merged))
    }

    /// Ask the model whether two statements about `category` contradict.
    ///
    /// Conservative: any failure reports "no conflict".
    pub async fn statements_conflict(&self, first: &str, second: &str, category: &str) -> bool {
        let prompt = format!(
            "Determine if these two statements about {category} conflict:\n\n\
             Statement 1: {first}\nStatement 2: {second}\n\n\
             Return ONLY a JSON object: {{\"conflict\": true|false, \"reason\": \"...\"}}\n\n\
             Examples of conflicts:\n\
             - \"Lives in Chennai\" vs \"Lives in Bangalore\" = true\n\
             - \"Works at Google\" vs \"Works at Microsoft\" = true\n\
             - \"Likes pizza\" vs \"Loves pizza\" = false (same preference)"
        );

        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            system: Some(
                "You are a conflict detection system. Determine if statements contradict."
                    .to_owned(),
            ),
            max_tokens: Some(256),
            temperature: Some(0.0),
        };

        let provider = self.router.resolve(ROLE_EXTRACTION);
        match provider.complete(request).await {
            Ok(response) => extract_json_object(&response.text)
                .and_then(|value| value.get("conflict").and_then(serde_json::Value::as_bool))
                .unwrap_or(false),
            Err(err) => {
                warn!(error = %err, "conflict adjudication failed; assuming no conflict");
                false
            }
        }
    }
}

/// Parse extraction output into raw candidates.
///
/// Accepts a bare JSON array, a fenced ```json block, or a `{"memories":
/// [...]}` object. Anything else yields an empty list with a warning.
pub fn parse_candidates(text: &str) -> Vec<RawCandidate> {
    let Some(json_text) = locate_json(text) else {
        warn!(
            preview = text.chars().take(120).collect::<String>(),
            "no JSON found in extraction output"
        );
        return Vec::new();
    };

    match serde_json::from_str::<ExtractionPayload>(json_text) {
        Ok(ExtractionPayload::List(candidates)) => candidates,
        Ok(ExtractionPayload::Wrapped { memories }) => memories,
        Err(err) => {
            warn!(
                error = %err,
                preview = json_text.chars().take(120).collect::<String>(),
                "failed to parse extraction JSON"
            );
            Vec::new()
        }
    }
}

/// Find the JSON payload inside possibly-fenced, possibly-chatty output.
fn locate_json(text: &str) -> Option<&str> {
    let mut trimmed = text.trim();

    // Strip a markdown fence, with or without a language tag.
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches(['\r', '\n']);
        trimmed = rest.strip_suffix("```").unwrap_or(rest).trim();
    }

    // Prefer an array; fall back to an object wrapper.
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                return Some(&trimmed[start..=end]);
            }
        }
    }
    None
}

fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    locate_json(text).and_then(|json| serde_json::from_str(json).ok())
}

fn snippet(text: &str) -> String {
    text.chars().take(CONTEXT_SNIPPET_CHARS).collect()
}
