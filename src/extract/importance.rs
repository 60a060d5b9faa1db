//! Initial importance weighting for new memories.
//!
//! Importance controls lifecycle behavior downstream: `critical` memories
//! never expire or decay, `low` ones fade fastest. The initial weight comes
//! from the memory kind's base score adjusted by keyword signals, extraction
//! confidence, entity richness, and time-sensitivity.

use crate::store::{Context, ImportanceLevel, MemoryKind};

/// Identity, relationship, and goal statements are never forgotten.
const CRITICAL_KEYWORDS: &[&str] = &[
    "my name",
    "i am",
    "i'm called",
    "call me",
    "my wife",
    "my husband",
    "my partner",
    "my fiance",
    "my goal",
    "i want to",
    "i plan to",
];

const HIGH_IMPORTANCE_KEYWORDS: &[&str] = &[
    "always",
    "never",
    "important",
    "remember",
    "deadline",
    "appointment",
    "meeting",
    "promise",
];

fn base_weight(kind: MemoryKind) -> f64 {
    match kind {
        MemoryKind::Entity => 0.8,
        MemoryKind::Fact => 0.7,
        MemoryKind::Preference => 0.75,
        MemoryKind::Commitment => 0.9,
        MemoryKind::Instruction => 0.85,
    }
}

/// Compute the initial `(importance_score, importance_level)` pair.
pub fn initial_importance(
    kind: MemoryKind,
    content: &str,
    confidence: f64,
    entities: &[String],
    context: &Context,
) -> (f64, ImportanceLevel) {
    let content_lower = content.to_lowercase();
    let base = base_weight(kind);

    let (mut weight, mut level) = if CRITICAL_KEYWORDS.iter().any(|kw| content_lower.contains(kw)) {
        (1.0, ImportanceLevel::Critical)
    } else if HIGH_IMPORTANCE_KEYWORDS
        .iter()
        .any(|kw| content_lower.contains(kw))
    {
        ((base * 1.3).min(1.0), ImportanceLevel::High)
    } else {
        match kind {
            MemoryKind::Commitment | MemoryKind::Instruction => (base, ImportanceLevel::High),
            MemoryKind::Preference | MemoryKind::Entity => (base, ImportanceLevel::Medium),
            MemoryKind::Fact => (base * 0.8, ImportanceLevel::Low),
        }
    };

    weight *= confidence.clamp(0.0, 1.0);

    // More named entities means richer anchoring context.
    if entities.len() > 2 {
        weight = (weight * 1.1).min(1.0);
    }

    // Time-sensitive content must not fade before its date passes.
    if context.contains_key("scheduled_date") {
        weight = (weight * 1.2).min(1.0);
        if matches!(level, ImportanceLevel::Medium | ImportanceLevel::Low) {
            level = ImportanceLevel::High;
        }
    }

    ((weight * 1000.0).round() / 1000.0, level)
}
