//! Offline memory lifecycle: TTL expiry, decay refresh, consolidation, and
//! conflict resolution.
//!
//! All of this is best-effort background work. The worker either runs one
//! pass for a user ([`LifecycleWorker::run_once`]) or loops on an interval
//! over every known user ([`LifecycleWorker::run`]). Nothing here is on the
//! request path.

pub mod conflict;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::embedding::dot;
use crate::error::EngineError;
use crate::extract::MemoryExtractor;
use crate::store::{parse_ts, Context, ImportanceLevel, MemoryKind, MemoryStore, NewMemory};

/// Memories examined per decay/expiry pass.
const SCAN_LIMIT: usize = 1000;
/// Memories examined per consolidation pass.
const CONSOLIDATION_SCAN_LIMIT: usize = 500;
/// Memories examined per conflict pass.
const CONFLICT_SCAN_LIMIT: usize = 200;

/// Counters from one lifecycle pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    /// Entity memories removed by TTL.
    pub expired_entities: usize,
    /// Fulfilled commitments removed after the grace window.
    pub removed_commitments: usize,
    /// Decay scores written back.
    pub decay_updates: usize,
    /// Similar-memory clusters consolidated.
    pub consolidated_clusters: usize,
    /// Conflicts resolved.
    pub conflicts_resolved: usize,
}

/// Tunables for the lifecycle worker.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    /// Days after which `entity` memories expire.
    pub entity_ttl_days: i64,
    /// Days a fulfilled commitment is retained.
    pub commitment_grace_days: i64,
    /// Minimum decay change that is written back.
    pub decay_write_threshold: f64,
    /// Cosine similarity at or above which memories consolidate.
    pub consolidation_threshold: f64,
}

/// Background lifecycle worker.
pub struct LifecycleWorker {
    store: Arc<MemoryStore>,
    extractor: Arc<MemoryExtractor>,
    policy: LifecyclePolicy,
}

impl std::fmt::Debug for LifecycleWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleWorker")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LifecycleWorker {
    /// Create a worker over the store and extractor.
    pub fn new(
        store: Arc<MemoryStore>,
        extractor: Arc<MemoryExtractor>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            extractor,
            policy,
        }
    }

    /// Run one full pass for a user, with `current_turn` supplied by the
    /// caller as the reference point for decay.
    ///
    /// # Errors
    ///
    /// Returns storage errors; individual item failures are logged and
    /// skipped.
    pub async fn run_once(
        &self,
        user_id: &str,
        current_turn: i64,
    ) -> Result<LifecycleReport, EngineError> {
        let report = LifecycleReport {
            expired_entities: self.expire_entities(user_id).await?,
            removed_commitments: self.cleanup_fulfilled_commitments(user_id).await?,
            decay_updates: self.refresh_decay(user_id, current_turn).await?,
            consolidated_clusters: self.consolidate(user_id).await?,
            conflicts_resolved: conflict::resolve_user_conflicts(
                &self.store,
                &self.extractor,
                user_id,
                CONFLICT_SCAN_LIMIT,
            )
            .await?,
        };
        info!(user = user_id, ?report, "lifecycle pass complete");
        Ok(report)
    }

    /// Loop forever, running one pass per known user every `interval`.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let users = match self.store.user_ids().await {
                Ok(users) => users,
                Err(err) => {
                    warn!(error = %err, "lifecycle user listing failed");
                    continue;
                }
            };
            for user_id in users {
                let current_turn = self.store.max_turn(&user_id).await.unwrap_or(0);
                if let Err(err) = self.run_once(&user_id, current_turn).await {
                    warn!(user = %user_id, error = %err, "lifecycle pass failed");
                }
            }
        }
    }

    /// TTL expiry for `entity` memories. Preference, fact, and instruction
    /// are persistent; `critical` importance never expires.
    async fn expire_entities(&self, user_id: &str) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.policy.entity_ttl_days);
        let entities = self
            .store
            .list(user_id, Some(MemoryKind::Entity), SCAN_LIMIT)
            .await?;

        let mut expired = 0usize;
        for memory in entities {
            if memory.importance_level == ImportanceLevel::Critical {
                continue;
            }
            if memory.created_at < cutoff {
                match self.store.delete(memory.memory_id).await {
                    Ok(()) => expired += 1,
                    Err(err) => warn!(memory = %memory.memory_id, error = %err, "entity expiry failed"),
                }
            }
        }
        if expired > 0 {
            info!(user = user_id, expired, "expired old entity memories");
        }
        Ok(expired)
    }

    /// Delete commitments marked fulfilled more than the grace window ago.
    async fn cleanup_fulfilled_commitments(&self, user_id: &str) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.policy.commitment_grace_days);
        let commitments = self
            .store
            .list(user_id, Some(MemoryKind::Commitment), SCAN_LIMIT)
            .await?;

        let mut removed = 0usize;
        for memory in commitments {
            let fulfilled = memory
                .context
                .get("fulfilled")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !fulfilled {
                continue;
            }
            let fulfilled_at = memory
                .context
                .get("fulfilled_at")
                .and_then(Value::as_str)
                .and_then(|raw| parse_ts(raw).ok());
            let Some(fulfilled_at) = fulfilled_at else {
                continue;
            };
            if fulfilled_at < cutoff {
                match self.store.delete(memory.memory_id).await {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        warn!(memory = %memory.memory_id, error = %err, "commitment cleanup failed");
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Recompute decay scores, writing back only meaningful changes.
    async fn refresh_decay(&self, user_id: &str, current_turn: i64) -> Result<usize, EngineError> {
        let memories = self.store.recent(user_id, SCAN_LIMIT).await?;
        let mut updates = 0usize;

        for memory in memories {
            let fresh = memory.compute_decay(current_turn);
            if (memory.decay_score - fresh).abs() > self.policy.decay_write_threshold {
                match self.store.set_decay(memory.memory_id, fresh).await {
                    Ok(()) => updates += 1,
                    Err(err) => warn!(memory = %memory.memory_id, error = %err, "decay write failed"),
                }
            }
        }
        debug!(user = user_id, updates, "decay refresh complete");
        Ok(updates)
    }

    /// Cluster high-similarity memories and merge each cluster into one
    /// consolidated memory inheriting the max confidence and the union of
    /// tags and entities. Originals are deleted after a successful create.
    async fn consolidate(&self, user_id: &str) -> Result<usize, EngineError> {
        let memories = self
            .store
            .recent(user_id, CONSOLIDATION_SCAN_LIMIT)
            .await?;
        let mut consumed: std::collections::HashSet<uuid::Uuid> = std::collections::HashSet::new();
        let mut clusters = 0usize;

        for (i, seed) in memories.iter().enumerate() {
            if consumed.contains(&seed.memory_id) {
                continue;
            }

            let similar: Vec<_> = memories
                .iter()
                .skip(i + 1)
                .filter(|other| {
                    other.kind == seed.kind
                        && !consumed.contains(&other.memory_id)
                        && f64::from(dot(&seed.embedding, &other.embedding))
                            >= self.policy.consolidation_threshold
                })
                .collect();
            if similar.is_empty() {
                continue;
            }

            let contents: Vec<String> = std::iter::once(seed.content.clone())
                .chain(similar.iter().map(|m| m.content.clone()))
                .collect();
            let merged = match self.extractor.consolidate(&contents).await {
                Ok(Some(merged)) => merged,
                Ok(None) => continue,
                Err(err) => {
                    warn!(user = user_id, error = %err, "consolidation merge failed");
                    continue;
                }
            };

            let cluster: Vec<&crate::store::Memory> = std::iter::once(seed)
                .chain(similar.iter().copied())
                .collect();
            let confidence = cluster
                .iter()
                .map(|m| m.confidence)
                .fold(0.0_f64, f64::max);
            let mut tags: Vec<String> = Vec::new();
            let mut entities: Vec<String> = Vec::new();
            for member in &cluster {
                for tag in &member.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                for entity in &member.entities {
                    if !entities.contains(entity) {
                        entities.push(entity.clone());
                    }
                }
            }

            let mut context = Context::new();
            context.insert(
                "consolidated_from".to_owned(),
                Value::Array(
                    cluster
                        .iter()
                        .map(|m| Value::String(m.memory_id.to_string()))
                        .collect(),
                ),
            );

            let consolidated = NewMemory {
                user_id: user_id.to_owned(),
                kind: seed.kind,
                content: merged,
                source_turn: seed.source_turn,
                confidence,
                tags,
                entities,
                context,
            };

            match self.store.create(consolidated).await {
                Ok(created) => {
                    for member in &cluster {
                        if let Err(err) = self.store.delete(member.memory_id).await {
                            warn!(memory = %member.memory_id, error = %err, "original delete failed after consolidation");
                        }
                        consumed.insert(member.memory_id);
                    }
                    clusters += 1;
                    info!(
                        user = user_id,
                        consolidated = %created.memory_id,
                        originals = cluster.len(),
                        "memory cluster consolidated"
                    );
                }
                Err(err) => {
                    // Originals stay; the cluster will be retried next pass.
                    warn!(user = user_id, error = %err, "consolidated create failed");
                }
            }
        }

        Ok(clusters)
    }
}
