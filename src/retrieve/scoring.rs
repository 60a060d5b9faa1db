//! Composite relevance scoring with adaptive weight profiles and tiering.
//!
//! Score = α·similarity + β·recency + γ·usage + δ·confidence
//!       − ε·conflict − ζ·decay, clamped to [0, 1].
//!
//! The weight profile is chosen by query intent: schedule queries boost
//! recency and decay, personal queries boost usage and confidence.

use super::intent::QueryProfile;

/// Turn-age boundary for the HOT tier.
pub const HOT_TURNS: i64 = 50;
/// Turn-age boundary for the WARM tier.
pub const WARM_TURNS: i64 = 500;
/// Turns over which the decay penalty reaches its maximum.
pub const DECAY_HORIZON_TURNS: f64 = 1000.0;

/// Per-turn recency decay rate (half-life of ~100 turns).
const RECENCY_DECAY_RATE: f64 = 0.993;
/// Floor for the recency score.
const RECENCY_FLOOR: f64 = 0.1;

/// Retrieval admission tier as a function of turn age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTier {
    /// Created within the last 50 turns: always searched.
    Hot,
    /// Created within the last 500 turns: searched by default.
    Warm,
    /// Older: admitted only above the cold similarity floor.
    Cold,
}

impl MemoryTier {
    /// Classify a turn-age delta into a tier.
    pub fn for_age(turn_age: i64) -> Self {
        if turn_age <= HOT_TURNS {
            Self::Hot
        } else if turn_age <= WARM_TURNS {
            Self::Warm
        } else {
            Self::Cold
        }
    }
}

/// One profile's score weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightProfile {
    /// Similarity weight.
    pub alpha: f64,
    /// Recency weight.
    pub beta: f64,
    /// Usage weight.
    pub gamma: f64,
    /// Confidence weight.
    pub delta: f64,
    /// Conflict penalty weight.
    pub epsilon: f64,
    /// Decay penalty weight.
    pub zeta: f64,
}

impl WeightProfile {
    /// Weights for a query profile.
    pub fn for_profile(profile: QueryProfile) -> Self {
        match profile {
            QueryProfile::Schedule => Self {
                alpha: 0.40,
                beta: 0.20,
                gamma: 0.10,
                delta: 0.10,
                epsilon: 0.10,
                zeta: 0.10,
            },
            QueryProfile::Personal => Self {
                alpha: 0.45,
                beta: 0.10,
                gamma: 0.15,
                delta: 0.15,
                epsilon: 0.10,
                zeta: 0.05,
            },
            QueryProfile::General => Self {
                alpha: 0.45,
                beta: 0.15,
                gamma: 0.10,
                delta: 0.10,
                epsilon: 0.15,
                zeta: 0.05,
            },
        }
    }
}

/// Component scores for one candidate, kept for explainability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreComponents {
    /// Cosine similarity from the index.
    pub similarity: f64,
    /// Turn-age recency score.
    pub recency: f64,
    /// `ln(1 + access_count)` usage boost.
    pub usage: f64,
    /// Extraction confidence.
    pub confidence: f64,
    /// 1.0 when the memory carries a conflict annotation.
    pub conflict_penalty: f64,
    /// Turn-age decay penalty, `min(1, age / 1000)`.
    pub decay_penalty: f64,
}

/// Recency score: exponential decay over turn age with a floor of 0.1.
///
/// A `current_turn` of zero (or a memory from the future of the query)
/// scores a full 1.0.
pub fn recency_score(source_turn: i64, current_turn: i64) -> f64 {
    if current_turn <= 0 {
        return 1.0;
    }
    let age = current_turn - source_turn;
    if age <= 0 {
        return 1.0;
    }
    RECENCY_DECAY_RATE.powf(age as f64).max(RECENCY_FLOOR)
}

/// Usage boost on a log scale.
pub fn usage_score(access_count: i64) -> f64 {
    (1.0 + access_count.max(0) as f64).ln()
}

/// Decay penalty growing linearly over [`DECAY_HORIZON_TURNS`].
pub fn decay_penalty(turn_age: i64) -> f64 {
    (turn_age.max(0) as f64 / DECAY_HORIZON_TURNS).min(1.0)
}

/// Combine components under a weight profile, clamped to [0, 1].
pub fn composite_score(components: &ScoreComponents, weights: &WeightProfile) -> f64 {
    let score = weights.alpha * components.similarity
        + weights.beta * components.recency
        + weights.gamma * components.usage
        + weights.delta * components.confidence
        - weights.epsilon * components.conflict_penalty
        - weights.zeta * components.decay_penalty;
    score.clamp(0.0, 1.0)
}
