//! Offline conflict detection and resolution.
//!
//! Contradictions (moved cities, changed jobs, new relationship status) are
//! detected by pattern bags and adjudicated by the extraction model. On a
//! confirmed conflict the newer memory supersedes the older one: both get
//! mutually pointing context annotations and the older memory's importance
//! is lowered. Preference changes are linked as evolution instead of
//! superseded. This runs only inside the lifecycle worker, never on the
//! request path.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::extract::MemoryExtractor;
use crate::store::{ImportanceLevel, Memory, MemoryKind, MemoryStore};

/// Importance assigned to a superseded memory.
const SUPERSEDED_IMPORTANCE: f64 = 0.3;

/// Bound on pairwise adjudication calls per pass.
const MAX_ADJUDICATIONS: usize = 32;

/// Conflict category detected by pattern match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCategory {
    /// The user moved.
    Location,
    /// Job or employer changed.
    Job,
    /// Relationship status changed.
    Relationship,
    /// Stated age contradicts an earlier one.
    Age,
    /// Likes/dislikes changed.
    Preference,
}

impl ConflictCategory {
    /// Label passed to the adjudication prompt.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Job => "job",
            Self::Relationship => "relationship",
            Self::Age => "age",
            Self::Preference => "preference",
        }
    }

    fn patterns(&self) -> &'static [&'static str] {
        match self {
            Self::Location => &["live in", "based in", "located in", "moved to"],
            Self::Job => &["work at", "working at", "employed by", "job at", "position at"],
            Self::Relationship => &["married to", "dating", "engaged to", "partner", "single"],
            Self::Age => &["years old", "age is", "age:"],
            Self::Preference => &["like", "love", "hate", "dislike", "prefer"],
        }
    }

    fn all() -> [Self; 5] {
        [
            Self::Location,
            Self::Job,
            Self::Relationship,
            Self::Age,
            Self::Preference,
        ]
    }
}

fn matched_category(a: &Memory, b: &Memory) -> Option<ConflictCategory> {
    let a_lower = a.content.to_lowercase();
    let b_lower = b.content.to_lowercase();
    for category in ConflictCategory::all() {
        if category == ConflictCategory::Preference {
            // Preference conflicts additionally require both to be preferences.
            if a.kind != MemoryKind::Preference || b.kind != MemoryKind::Preference {
                continue;
            }
        }
        let patterns = category.patterns();
        if patterns.iter().any(|p| a_lower.contains(p))
            && patterns.iter().any(|p| b_lower.contains(p))
        {
            return Some(category);
        }
    }
    None
}

/// Detect and resolve contradictions within one user's memory space.
///
/// Scans the `scan_limit` most recent memories, adjudicates pattern-matched
/// pairs with the LLM, and annotates confirmed conflicts. Returns the number
/// of conflicts resolved.
///
/// # Errors
///
/// Returns storage errors; adjudication failures are treated as no-conflict.
pub async fn resolve_user_conflicts(
    store: &MemoryStore,
    extractor: &MemoryExtractor,
    user_id: &str,
    scan_limit: usize,
) -> Result<usize, EngineError> {
    let memories = store.recent(user_id, scan_limit).await?;
    let mut resolved = 0usize;
    let mut adjudications = 0usize;

    for (i, newer) in memories.iter().enumerate() {
        if newer.context.contains_key("superseded_by") {
            continue;
        }
        for older in memories.iter().skip(i + 1) {
            if older.kind != newer.kind || older.context.contains_key("superseded_by") {
                continue;
            }
            let Some(category) = matched_category(newer, older) else {
                continue;
            };

            if adjudications >= MAX_ADJUDICATIONS {
                return Ok(resolved);
            }
            adjudications += 1;

            if !extractor
                .statements_conflict(&newer.content, &older.content, category.as_str())
                .await
            {
                continue;
            }

            // `recent` is newest-first, but canonical updates can reorder
            // source turns; trust the turn numbers.
            let (winner, loser) = if newer.source_turn >= older.source_turn {
                (newer, older)
            } else {
                (older, newer)
            };

            match apply_resolution(store, winner, loser, category).await {
                Ok(()) => resolved += 1,
                Err(err) => {
                    warn!(user = user_id, error = %err, "conflict annotation failed");
                }
            }
        }
    }

    if resolved > 0 {
        info!(user = user_id, resolved, "memory conflicts resolved");
    }
    Ok(resolved)
}

async fn apply_resolution(
    store: &MemoryStore,
    winner: &Memory,
    loser: &Memory,
    category: ConflictCategory,
) -> Result<(), EngineError> {
    let now = Utc::now().to_rfc3339();

    if category == ConflictCategory::Preference {
        // Preferences evolve; keep both and link the chain.
        let mut winner_ctx = winner.context.clone();
        winner_ctx.insert(
            "evolved_from".to_owned(),
            Value::String(loser.memory_id.to_string()),
        );
        let mut loser_ctx = loser.context.clone();
        loser_ctx.insert(
            "evolved_to".to_owned(),
            Value::String(winner.memory_id.to_string()),
        );
        store.update_context(winner.memory_id, winner_ctx).await?;
        store.update_context(loser.memory_id, loser_ctx).await?;
        return Ok(());
    }

    // supersedes / superseded_by must point at each other.
    let mut winner_ctx = winner.context.clone();
    winner_ctx.insert(
        "supersedes".to_owned(),
        Value::String(loser.memory_id.to_string()),
    );
    winner_ctx.insert(
        "previous_value".to_owned(),
        Value::String(loser.content.clone()),
    );

    let mut loser_ctx = loser.context.clone();
    loser_ctx.insert(
        "superseded_by".to_owned(),
        Value::String(winner.memory_id.to_string()),
    );
    loser_ctx.insert("superseded_at".to_owned(), Value::String(now));
    loser_ctx.insert(
        "resolution".to_owned(),
        Value::String("outdated_information".to_owned()),
    );

    store.update_context(winner.memory_id, winner_ctx).await?;
    store.update_context(loser.memory_id, loser_ctx).await?;
    store
        .set_importance(loser.memory_id, SUPERSEDED_IMPORTANCE, ImportanceLevel::Low)
        .await?;

    info!(
        winner = %winner.memory_id,
        loser = %loser.memory_id,
        category = category.as_str(),
        "conflict resolved; newer memory supersedes"
    );
    Ok(())
}
