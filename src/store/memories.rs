//! Authoritative memory row store.
//!
//! `create` performs the transactional row insert first and treats the
//! vector index as a derived cache: a failed index upsert is logged and left
//! for [`MemoryStore::reconcile_index`] to repair, while a failed row insert
//! never touches the index. Deletes propagate best-effort; retrieval filters
//! out index orphans whose row is gone.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{is_unique_violation, EngineError};
use crate::extract::importance::initial_importance;
use crate::index::{IndexEntry, VectorIndex};

use super::access::{run_access_actor, AccessOp};
use super::{
    content_hash, embedding_json, format_ts, parse_context, parse_embedding, parse_string_list,
    parse_ts, parse_uuid, Context, ImportanceLevel, Memory, MemoryKind, MemoryPatch, MemoryStats,
    NewMemory,
};

/// Access-actor channel capacity — bounded to provide backpressure.
const ACCESS_CHANNEL_CAPACITY: usize = 1024;

/// Access count at which a memory counts as "hot" in stats.
const HOT_ACCESS_THRESHOLD: i64 = 5;

const MEMORY_COLUMNS: &str = "memory_id, user_id, type, content, content_hash, embedding, \
     source_turn, created_at, last_accessed, access_count, confidence, importance_score, \
     importance_level, decay_score, tags, entities, context, last_used_turn";

/// Gateway to the `memories` table and its derived vector index.
pub struct MemoryStore {
    db: SqlitePool,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    access_tx: mpsc::Sender<AccessOp>,
    access_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("index_len", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a store over the given pool, index, and embedder.
    ///
    /// Spawns the access-accounting actor as a background task.
    pub fn new(db: SqlitePool, index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        let (access_tx, access_rx) = mpsc::channel(ACCESS_CHANNEL_CAPACITY);
        let actor_pool = db.clone();
        let access_handle = tokio::spawn(run_access_actor(actor_pool, access_rx));

        Self {
            db,
            index,
            embedder,
            access_tx,
            access_handle,
        }
    }

    /// Create a memory: embed, hash, weight, insert the row, mirror to the
    /// index.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateMemory`] when `(user_id,
    /// content_hash)` already exists, [`EngineError::Validation`] on bad
    /// input, and dependency errors when embedding or the row store fail.
    pub async fn create(&self, new: NewMemory) -> Result<Memory, EngineError> {
        new.validate()?;

        let embedding = self.embedder.embed(&new.content).await?;
        if embedding.len() != self.embedder.dimensions() {
            return Err(EngineError::Internal(format!(
                "embedder returned {} dims, expected {}",
                embedding.len(),
                self.embedder.dimensions()
            )));
        }

        let (importance_score, importance_level) = initial_importance(
            new.kind,
            &new.content,
            new.confidence,
            &new.entities,
            &new.context,
        );

        let now = Utc::now();
        let memory = Memory {
            memory_id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            content_hash: content_hash(&new.content),
            content: new.content,
            embedding,
            source_turn: new.source_turn,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            confidence: new.confidence,
            importance_score,
            importance_level,
            decay_score: 1.0,
            tags: new.tags,
            entities: new.entities,
            context: new.context,
            last_used_turn: None,
        };

        let insert = sqlx::query(
            "INSERT INTO memories (memory_id, user_id, type, content, content_hash, embedding, \
                 source_turn, created_at, last_accessed, access_count, confidence, \
                 importance_score, importance_level, decay_score, tags, entities, context, \
                 last_used_turn) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        )
        .bind(memory.memory_id.to_string())
        .bind(&memory.user_id)
        .bind(memory.kind.as_str())
        .bind(&memory.content)
        .bind(&memory.content_hash)
        .bind(embedding_json(&memory.embedding))
        .bind(memory.source_turn)
        .bind(format_ts(memory.created_at))
        .bind(format_ts(memory.last_accessed))
        .bind(memory.access_count)
        .bind(memory.confidence)
        .bind(memory.importance_score)
        .bind(memory.importance_level.as_str())
        .bind(memory.decay_score)
        .bind(serde_json::to_string(&memory.tags)?)
        .bind(serde_json::to_string(&memory.entities)?)
        .bind(serde_json::to_string(&memory.context)?)
        .bind(memory.last_used_turn)
        .execute(&self.db)
        .await;

        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(EngineError::DuplicateMemory {
                    user_id: memory.user_id,
                });
            }
            return Err(err.into());
        }

        // Row is authoritative; an index failure degrades retrieval for this
        // memory until the next reconciliation pass.
        if let Err(err) = self.index.upsert(IndexEntry::from_memory(&memory)).await {
            warn!(memory_id = %memory.memory_id, error = %err, "index upsert failed after row insert");
        }

        debug!(memory_id = %memory.memory_id, user = %memory.user_id, kind = memory.kind.as_str(), "memory created");
        Ok(memory)
    }

    /// Fetch a memory by id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the row does not exist.
    pub async fn get(&self, memory_id: Uuid) -> Result<Memory, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE memory_id = ?1"
        ))
        .bind(memory_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => row_to_memory(&row),
            None => Err(EngineError::NotFound {
                entity: "memory",
                id: memory_id.to_string(),
            }),
        }
    }

    /// Apply a partial update, re-embedding only when content changed.
    ///
    /// The memory id is preserved so turn records referencing it stay valid.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for missing rows and
    /// [`EngineError::DuplicateMemory`] when new content collides with an
    /// existing hash.
    pub async fn update(&self, memory_id: Uuid, patch: MemoryPatch) -> Result<Memory, EngineError> {
        let mut memory = self.get(memory_id).await?;
        if patch.is_empty() {
            return Ok(memory);
        }

        let content_changed = patch
            .content
            .as_deref()
            .is_some_and(|content| content != memory.content);

        if let Some(content) = patch.content {
            memory.content = content;
        }
        if content_changed {
            let chars = memory.content.chars().count();
            if chars == 0 || chars > super::MAX_CONTENT_CHARS {
                return Err(EngineError::Validation(format!(
                    "content length {chars} outside 1..={}",
                    super::MAX_CONTENT_CHARS
                )));
            }
            memory.content_hash = content_hash(&memory.content);
            memory.embedding = self.embedder.embed(&memory.content).await?;
        }
        if let Some(confidence) = patch.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(EngineError::Validation(format!(
                    "confidence {confidence} outside [0, 1]"
                )));
            }
            memory.confidence = confidence;
        }
        if let Some(source_turn) = patch.source_turn {
            memory.source_turn = source_turn;
        }
        if let Some(tags) = patch.tags {
            memory.tags = tags;
        }
        if let Some(entities) = patch.entities {
            memory.entities = entities;
        }
        if let Some(context) = patch.context {
            memory.context = context;
        }
        if let Some((score, level)) = patch.importance {
            memory.importance_score = score;
            memory.importance_level = level;
        }

        let result = sqlx::query(
            "UPDATE memories SET content = ?1, content_hash = ?2, embedding = ?3, \
                 confidence = ?4, source_turn = ?5, tags = ?6, entities = ?7, context = ?8, \
                 importance_score = ?9, importance_level = ?10 \
             WHERE memory_id = ?11",
        )
        .bind(&memory.content)
        .bind(&memory.content_hash)
        .bind(embedding_json(&memory.embedding))
        .bind(memory.confidence)
        .bind(memory.source_turn)
        .bind(serde_json::to_string(&memory.tags)?)
        .bind(serde_json::to_string(&memory.entities)?)
        .bind(serde_json::to_string(&memory.context)?)
        .bind(memory.importance_score)
        .bind(memory.importance_level.as_str())
        .bind(memory.memory_id.to_string())
        .execute(&self.db)
        .await;

        if let Err(err) = result {
            if is_unique_violation(&err) {
                return Err(EngineError::DuplicateMemory {
                    user_id: memory.user_id,
                });
            }
            return Err(err.into());
        }

        if let Err(err) = self.index.upsert(IndexEntry::from_memory(&memory)).await {
            warn!(memory_id = %memory.memory_id, error = %err, "index upsert failed after update");
        }

        Ok(memory)
    }

    /// Replace only the context map of a memory.
    ///
    /// # Errors
    ///
    /// Returns storage errors; missing rows surface as [`EngineError::NotFound`].
    pub async fn update_context(
        &self,
        memory_id: Uuid,
        context: Context,
    ) -> Result<(), EngineError> {
        let result = sqlx::query("UPDATE memories SET context = ?1 WHERE memory_id = ?2")
            .bind(serde_json::to_string(&context)?)
            .bind(memory_id.to_string())
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                entity: "memory",
                id: memory_id.to_string(),
            });
        }
        Ok(())
    }

    /// Write back a recomputed decay score.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn set_decay(&self, memory_id: Uuid, decay_score: f64) -> Result<(), EngineError> {
        sqlx::query("UPDATE memories SET decay_score = ?1 WHERE memory_id = ?2")
            .bind(decay_score)
            .bind(memory_id.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Lower or raise a memory's importance (conflict resolution).
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn set_importance(
        &self,
        memory_id: Uuid,
        score: f64,
        level: ImportanceLevel,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE memories SET importance_score = ?1, importance_level = ?2 WHERE memory_id = ?3",
        )
        .bind(score)
        .bind(level.as_str())
        .bind(memory_id.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Mark a commitment as fulfilled; the lifecycle worker deletes it after
    /// the grace window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the id does not resolve to a
    /// commitment.
    pub async fn mark_commitment_fulfilled(&self, memory_id: Uuid) -> Result<(), EngineError> {
        let mut memory = self.get(memory_id).await?;
        if memory.kind != MemoryKind::Commitment {
            return Err(EngineError::Validation(format!(
                "memory {memory_id} is not a commitment"
            )));
        }
        memory
            .context
            .insert("fulfilled".to_owned(), serde_json::Value::Bool(true));
        memory.context.insert(
            "fulfilled_at".to_owned(),
            serde_json::Value::String(format_ts(Utc::now())),
        );
        self.update_context(memory_id, memory.context).await
    }

    /// Delete a memory row and best-effort remove its index entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the row does not exist.
    pub async fn delete(&self, memory_id: Uuid) -> Result<(), EngineError> {
        let result = sqlx::query("DELETE FROM memories WHERE memory_id = ?1")
            .bind(memory_id.to_string())
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                entity: "memory",
                id: memory_id.to_string(),
            });
        }

        // An orphaned index entry is filtered out at read time.
        if let Err(err) = self.index.remove(memory_id).await {
            warn!(memory_id = %memory_id, error = %err, "index delete failed; orphan left for read-time filtering");
        }
        Ok(())
    }

    /// Delete every memory owned by `user_id`. Returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn delete_user(&self, user_id: &str) -> Result<u64, EngineError> {
        let result = sqlx::query("DELETE FROM memories WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if let Err(err) = self.index.remove_user(user_id).await {
            warn!(user = user_id, error = %err, "index user wipe failed");
        }
        info!(user = user_id, count = result.rows_affected(), "user memories deleted");
        Ok(result.rows_affected())
    }

    /// List memories newest-first, optionally filtered by kind.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn list(
        &self,
        user_id: &str,
        kind: Option<MemoryKind>,
        limit: usize,
    ) -> Result<Vec<Memory>, EngineError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match kind {
            Some(kind) => {
                sqlx::query(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories \
                     WHERE user_id = ?1 AND type = ?2 \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?3"
                ))
                .bind(user_id)
                .bind(kind.as_str())
                .bind(limit_i64)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories \
                     WHERE user_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ))
                .bind(user_id)
                .bind(limit_i64)
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.iter().map(row_to_memory).collect()
    }

    /// The most recent `limit` memories with embeddings, for deduplication.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Memory>, EngineError> {
        self.list(user_id, None, limit).await
    }

    /// Newest memory of `kind` whose content matches `pattern`
    /// (case-insensitive substring). Canonicalizer lookup.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn find_latest_matching(
        &self,
        user_id: &str,
        kind: MemoryKind,
        pattern: &str,
    ) -> Result<Option<Memory>, EngineError> {
        let like = format!("%{}%", pattern.to_lowercase());
        let row = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE user_id = ?1 AND type = ?2 AND lower(content) LIKE ?3 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(kind.as_str())
        .bind(&like)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_memory).transpose()
    }

    /// Subset of `ids` that still have live rows. Retrieval uses this to
    /// reject index orphans.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>, EngineError> {
        let mut live = HashSet::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT 1 FROM memories WHERE memory_id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.db)
                .await?;
            if row.is_some() {
                live.insert(*id);
            }
        }
        Ok(live)
    }

    /// Aggregate statistics for one user's memory space.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn stats(&self, user_id: &str) -> Result<MemoryStats, EngineError> {
        let rows = sqlx::query(
            "SELECT type, COUNT(*), AVG(confidence), MIN(source_turn), MAX(source_turn), \
                    SUM(access_count), \
                    SUM(CASE WHEN access_count >= ?2 THEN 1 ELSE 0 END) \
             FROM memories WHERE user_id = ?1 GROUP BY type",
        )
        .bind(user_id)
        .bind(HOT_ACCESS_THRESHOLD)
        .fetch_all(&self.db)
        .await?;

        let mut stats = MemoryStats {
            user_id: user_id.to_owned(),
            total_memories: 0,
            by_kind: Vec::new(),
            avg_confidence: 0.0,
            oldest_turn: 0,
            newest_turn: 0,
            total_accesses: 0,
            hot_memories: 0,
        };

        let mut confidence_weighted = 0.0;
        let mut oldest: Option<i64> = None;

        for row in rows {
            let kind = MemoryKind::parse(&row.try_get::<String, _>(0).map_err(sqlx_get)?)?;
            let count: i64 = row.try_get(1).map_err(sqlx_get)?;
            let avg_confidence: f64 = row.try_get(2).map_err(sqlx_get)?;
            let min_turn: i64 = row.try_get(3).map_err(sqlx_get)?;
            let max_turn: i64 = row.try_get(4).map_err(sqlx_get)?;
            let accesses: i64 = row.try_get(5).map_err(sqlx_get)?;
            let hot: i64 = row.try_get(6).map_err(sqlx_get)?;

            stats.by_kind.push((kind, count));
            stats.total_memories += count;
            confidence_weighted += avg_confidence * count as f64;
            oldest = Some(oldest.map_or(min_turn, |o| o.min(min_turn)));
            stats.newest_turn = stats.newest_turn.max(max_turn);
            stats.total_accesses += accesses;
            stats.hot_memories += hot;
        }

        if stats.total_memories > 0 {
            stats.avg_confidence = confidence_weighted / stats.total_memories as f64;
        }
        stats.oldest_turn = oldest.unwrap_or(0);
        Ok(stats)
    }

    /// Every distinct user id with at least one memory.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn user_ids(&self) -> Result<Vec<String>, EngineError> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM memories ORDER BY user_id")
            .fetch_all(&self.db)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(sqlx_get))
            .collect()
    }

    /// Highest turn observed for a user (source or retrieval), used as the
    /// lifecycle worker's notion of "now".
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn max_turn(&self, user_id: &str) -> Result<i64, EngineError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(MAX(source_turn), MAX(COALESCE(last_used_turn, 0))), 0) \
             FROM memories WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        row.try_get(0).map_err(sqlx_get)
    }

    /// Rebuild the vector index from the authoritative rows.
    ///
    /// Run at startup and after index failures; repairs degraded entries.
    ///
    /// # Errors
    ///
    /// Returns storage errors. Individual index failures are logged and
    /// skipped.
    pub async fn reconcile_index(&self) -> Result<usize, EngineError> {
        let rows = sqlx::query(&format!("SELECT {MEMORY_COLUMNS} FROM memories"))
            .fetch_all(&self.db)
            .await?;

        let mut repaired = 0usize;
        for row in &rows {
            let memory = row_to_memory(row)?;
            match self.index.upsert(IndexEntry::from_memory(&memory)).await {
                Ok(()) => repaired += 1,
                Err(err) => {
                    warn!(memory_id = %memory.memory_id, error = %err, "reconcile upsert failed");
                }
            }
        }
        info!(entries = repaired, "vector index reconciled from row store");
        Ok(repaired)
    }

    /// Queue deferred access accounting for retrieved memories.
    ///
    /// Batches through the access actor; never blocks the response path. A
    /// full channel drops the batch with a warning (counters are eventually
    /// consistent).
    pub fn record_access(&self, memory_ids: Vec<Uuid>, turn: i64) {
        if memory_ids.is_empty() {
            return;
        }
        if let Err(err) = self.access_tx.try_send(AccessOp::Touch { memory_ids, turn }) {
            warn!(error = %err, "access accounting batch dropped");
        }
    }

    /// Returns a reference to the underlying pool (for migrations, tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Shared vector index handle.
    pub fn index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }

    /// Shared embedder handle.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Gracefully shut down the access actor, draining pending batches.
    pub async fn shutdown(self) {
        drop(self.access_tx);
        let _ = self.access_handle.await;
        info!("memory store shut down");
    }
}

fn sqlx_get(err: sqlx::Error) -> EngineError {
    EngineError::Internal(format!("row decode: {err}"))
}

fn row_to_memory(row: &SqliteRow) -> Result<Memory, EngineError> {
    let memory_id = parse_uuid(&row.try_get::<String, _>("memory_id").map_err(sqlx_get)?)?;
    let kind = MemoryKind::parse(&row.try_get::<String, _>("type").map_err(sqlx_get)?)?;
    let importance_level =
        ImportanceLevel::parse(&row.try_get::<String, _>("importance_level").map_err(sqlx_get)?)?;

    Ok(Memory {
        memory_id,
        user_id: row.try_get("user_id").map_err(sqlx_get)?,
        kind,
        content: row.try_get("content").map_err(sqlx_get)?,
        content_hash: row.try_get("content_hash").map_err(sqlx_get)?,
        embedding: parse_embedding(&row.try_get::<String, _>("embedding").map_err(sqlx_get)?),
        source_turn: row.try_get("source_turn").map_err(sqlx_get)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(sqlx_get)?)?,
        last_accessed: parse_ts(&row.try_get::<String, _>("last_accessed").map_err(sqlx_get)?)?,
        access_count: row.try_get("access_count").map_err(sqlx_get)?,
        confidence: row.try_get("confidence").map_err(sqlx_get)?,
        importance_score: row.try_get("importance_score").map_err(sqlx_get)?,
        importance_level,
        decay_score: row.try_get("decay_score").map_err(sqlx_get)?,
        tags: parse_string_list(&row.try_get::<String, _>("tags").map_err(sqlx_get)?),
        entities: parse_string_list(&row.try_get::<String, _>("entities").map_err(sqlx_get)?),
        context: parse_context(&row.try_get::<String, _>("context").map_err(sqlx_get)?),
        last_used_turn: row.try_get("last_used_turn").map_err(sqlx_get)?,
    })
}
