//! Canonical memory resolution.
//!
//! Evolving preferences would otherwise pile up as near-duplicates ("prefers
//! morning calls" → "prefers 10am calls" → "prefers 11am calls"). Each
//! preference/instruction is assigned a canonical key from a synonym table;
//! when a key already has a memory for the user, that memory is updated in
//! place (content, confidence, source turn, version counter) and the insert
//! is skipped. The memory id is preserved so turn records stay valid.

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::store::{MemoryKind, MemoryPatch, MemoryStore};

/// Canonical preference keys and the synonym patterns that map to them.
const CANONICAL_KEYS: &[(&str, &[&str])] = &[
    // Communication preferences
    ("call_time", &["call", "phone", "meeting time"]),
    ("contact_preference", &["contact", "reach", "communicate"]),
    ("response_style", &["response", "answer", "reply style"]),
    ("language", &["language", "speak", "communicate in"]),
    // Scheduling preferences
    ("meeting_time", &["meeting", "schedule", "appointment time"]),
    ("timezone", &["timezone", "time zone"]),
    ("availability", &["available", "free", "open"]),
    // Food and dietary
    ("diet", &["diet", "eat", "food"]),
    ("favorite_food", &["favorite food", "likes to eat"]),
    ("allergies", &["allergic", "allergy", "cannot eat"]),
    // Work preferences
    ("work_hours", &["work hours", "working time"]),
    ("notification_preference", &["notification", "alert", "reminder"]),
    // Personal style
    ("formality", &["formal", "casual", "tone"]),
    ("brevity", &["brief", "detailed", "length"]),
];

/// Outcome of canonical resolution for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalOutcome {
    /// No canonical key applies; the caller should create a new memory.
    CreateNew,
    /// An existing memory was updated in place; skip the insert.
    UpdatedInPlace {
        /// The id of the updated memory.
        memory_id: Uuid,
    },
}

/// Detects canonical keys and folds updates into existing memories.
#[derive(Debug, Clone, Copy, Default)]
pub struct Canonicalizer;

impl Canonicalizer {
    /// Create a canonicalizer over the static key table.
    pub fn new() -> Self {
        Self
    }

    /// Detect the canonical key for a piece of content, if any.
    pub fn detect_key(&self, content: &str) -> Option<&'static str> {
        let content_lower = content.to_lowercase();
        for (key, patterns) in CANONICAL_KEYS {
            if patterns.iter().any(|p| content_lower.contains(p)) {
                return Some(key);
            }
        }
        None
    }

    /// Resolve whether `content` supersedes an existing canonical memory.
    ///
    /// Applies only to `preference` and `instruction`. When multiple
    /// memories match the key, the most recently created one wins.
    ///
    /// # Errors
    ///
    /// Returns storage errors from lookup or update.
    pub async fn resolve(
        &self,
        store: &MemoryStore,
        user_id: &str,
        content: &str,
        kind: MemoryKind,
        confidence: f64,
        turn_number: i64,
    ) -> Result<CanonicalOutcome, EngineError> {
        if !matches!(kind, MemoryKind::Preference | MemoryKind::Instruction) {
            return Ok(CanonicalOutcome::CreateNew);
        }

        let Some(key) = self.detect_key(content) else {
            return Ok(CanonicalOutcome::CreateNew);
        };

        let Some(existing) = self.find_canonical(store, user_id, key, kind).await? else {
            debug!(key, "no existing canonical memory; creating new");
            return Ok(CanonicalOutcome::CreateNew);
        };

        let mut context = existing.context.clone();
        let version = context
            .get("version")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(1)
            .saturating_add(1);
        context.insert("version".to_owned(), serde_json::Value::from(version));
        context.insert(
            "canonical_key".to_owned(),
            serde_json::Value::String(key.to_owned()),
        );

        store
            .update(
                existing.memory_id,
                MemoryPatch {
                    content: Some(content.to_owned()),
                    confidence: Some(confidence),
                    source_turn: Some(turn_number),
                    context: Some(context),
                    ..MemoryPatch::default()
                },
            )
            .await?;

        info!(
            key,
            memory_id = %existing.memory_id,
            version,
            "canonical memory updated in place"
        );
        Ok(CanonicalOutcome::UpdatedInPlace {
            memory_id: existing.memory_id,
        })
    }

    async fn find_canonical(
        &self,
        store: &MemoryStore,
        user_id: &str,
        key: &str,
        kind: MemoryKind,
    ) -> Result<Option<crate::store::Memory>, EngineError> {
        let patterns = CANONICAL_KEYS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, patterns)| *patterns)
            .unwrap_or(&[]);

        for pattern in patterns {
            if let Some(memory) = store.find_latest_matching(user_id, kind, pattern).await? {
                return Ok(Some(memory));
            }
        }
        Ok(None)
    }
}
