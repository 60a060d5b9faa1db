//! Conversation and turn persistence, including the short-term tail.
//!
//! Turns are the append-only short-term log; the last ~5 turns of a
//! conversation form the tail supplied verbatim to the LLM. The tail is read
//! from the row store on every turn rather than cached, so a turn never sees
//! a stale tail.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;

use super::{format_ts, parse_ts, parse_uuid, parse_uuid_list, uuid_list_json};

/// Maximum user/assistant message length accepted per turn.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Number of turns in the short-term tail.
pub const SHORT_TERM_TAIL_TURNS: usize = 5;

/// Lightweight conversation parent record.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Conversation identifier.
    pub conversation_id: Uuid,
    /// Owner scope.
    pub user_id: String,
    /// Display title.
    pub title: String,
    /// Number of persisted turns.
    pub turn_count: i64,
    /// Whether the conversation is archived.
    pub is_archived: bool,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: chrono::DateTime<Utc>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
}

/// One persisted dialogue turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    /// Turn identifier.
    pub turn_id: Uuid,
    /// Parent conversation.
    pub conversation_id: Uuid,
    /// Owner scope.
    pub user_id: String,
    /// Client-assigned monotonic turn number.
    pub turn_number: i64,
    /// The user's message.
    pub user_message: String,
    /// The assistant's response.
    pub assistant_message: String,
    /// Persistence timestamp.
    pub timestamp: chrono::DateTime<Utc>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Memories surfaced to this turn's generation.
    pub memories_retrieved: Vec<Uuid>,
    /// Memories created by this turn's extraction.
    pub memories_created: Vec<Uuid>,
}

/// Input for appending a turn.
#[derive(Debug, Clone)]
pub struct NewTurn {
    /// Parent conversation.
    pub conversation_id: Uuid,
    /// Owner scope.
    pub user_id: String,
    /// Client-assigned turn number.
    pub turn_number: i64,
    /// The user's message.
    pub user_message: String,
    /// The assistant's response.
    pub assistant_message: String,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Memories surfaced to generation.
    pub memories_retrieved: Vec<Uuid>,
    /// Memories created by extraction (usually filled in later).
    pub memories_created: Vec<Uuid>,
}

/// A full conversation export: parent plus all turns in order.
#[derive(Debug, Clone)]
pub struct ConversationExport {
    /// The conversation record.
    pub conversation: Conversation,
    /// All turns, chronological.
    pub turns: Vec<ConversationTurn>,
}

/// Gateway to the `conversations` and `conversation_turns` tables.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: SqlitePool,
}

impl ConversationStore {
    /// Create a store over the given pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a conversation for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn create(
        &self,
        user_id: &str,
        title: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<Conversation, EngineError> {
        let now = Utc::now();
        let conversation = Conversation {
            conversation_id: Uuid::new_v4(),
            user_id: user_id.to_owned(),
            title: title.unwrap_or("New Conversation").to_owned(),
            turn_count: 0,
            is_archived: false,
            created_at: now,
            updated_at: now,
            metadata,
        };

        sqlx::query(
            "INSERT INTO conversations (conversation_id, user_id, title, turn_count, \
                 is_archived, created_at, updated_at, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(conversation.conversation_id.to_string())
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.turn_count)
        .bind(i64::from(conversation.is_archived))
        .bind(format_ts(conversation.created_at))
        .bind(format_ts(conversation.updated_at))
        .bind(conversation.metadata.to_string())
        .execute(&self.db)
        .await?;

        info!(conversation = %conversation.conversation_id, user = user_id, "conversation created");
        Ok(conversation)
    }

    /// Fetch a conversation, validating ownership.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the conversation is missing or
    /// owned by a different user.
    pub async fn get(
        &self,
        conversation_id: Uuid,
        user_id: &str,
    ) -> Result<Conversation, EngineError> {
        let row = sqlx::query(
            "SELECT conversation_id, user_id, title, turn_count, is_archived, created_at, \
                    updated_at, metadata \
             FROM conversations WHERE conversation_id = ?1 AND user_id = ?2",
        )
        .bind(conversation_id.to_string())
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => row_to_conversation(&row),
            None => Err(EngineError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            }),
        }
    }

    /// List a user's conversations, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn list(
        &self,
        user_id: &str,
        include_archived: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>, EngineError> {
        let archived_filter = if include_archived {
            ""
        } else {
            "AND is_archived = 0"
        };
        let rows = sqlx::query(&format!(
            "SELECT conversation_id, user_id, title, turn_count, is_archived, created_at, \
                    updated_at, metadata \
             FROM conversations WHERE user_id = ?1 {archived_filter} \
             ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3"
        ))
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(0))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_conversation).collect()
    }

    /// Patch title / archived flag / metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the conversation is missing or
    /// not owned by `user_id`.
    pub async fn update(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        title: Option<&str>,
        is_archived: Option<bool>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Conversation, EngineError> {
        let mut conversation = self.get(conversation_id, user_id).await?;
        if let Some(title) = title {
            conversation.title = title.to_owned();
        }
        if let Some(is_archived) = is_archived {
            conversation.is_archived = is_archived;
        }
        if let Some(metadata) = metadata {
            conversation.metadata = metadata;
        }
        conversation.updated_at = Utc::now();

        sqlx::query(
            "UPDATE conversations SET title = ?1, is_archived = ?2, metadata = ?3, \
                 updated_at = ?4 \
             WHERE conversation_id = ?5 AND user_id = ?6",
        )
        .bind(&conversation.title)
        .bind(i64::from(conversation.is_archived))
        .bind(conversation.metadata.to_string())
        .bind(format_ts(conversation.updated_at))
        .bind(conversation_id.to_string())
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(conversation)
    }

    /// Delete a conversation and all of its turns.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when nothing was deleted.
    pub async fn delete(&self, conversation_id: Uuid, user_id: &str) -> Result<(), EngineError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?1 AND user_id = ?2")
            .bind(conversation_id.to_string())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let result =
            sqlx::query("DELETE FROM conversations WHERE conversation_id = ?1 AND user_id = ?2")
                .bind(conversation_id.to_string())
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            });
        }
        info!(conversation = %conversation_id, user = user_id, "conversation deleted");
        Ok(())
    }

    /// Search conversations by title or turn content (substring match).
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, EngineError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query(
            "SELECT DISTINCT c.conversation_id, c.user_id, c.title, c.turn_count, \
                    c.is_archived, c.created_at, c.updated_at, c.metadata \
             FROM conversations c \
             LEFT JOIN conversation_turns t ON c.conversation_id = t.conversation_id \
             WHERE c.user_id = ?1 AND ( \
                 lower(c.title) LIKE ?2 \
                 OR lower(t.user_message) LIKE ?2 \
                 OR lower(t.assistant_message) LIKE ?2) \
             ORDER BY c.updated_at DESC LIMIT ?3",
        )
        .bind(user_id)
        .bind(&pattern)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_conversation).collect()
    }

    /// Export a conversation with all turns in chronological order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the conversation is missing or
    /// not owned by `user_id`.
    pub async fn export(
        &self,
        conversation_id: Uuid,
        user_id: &str,
    ) -> Result<ConversationExport, EngineError> {
        let conversation = self.get(conversation_id, user_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turns \
             WHERE conversation_id = ?1 AND user_id = ?2 \
             ORDER BY turn_number ASC"
        ))
        .bind(conversation_id.to_string())
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let turns = rows
            .iter()
            .map(row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ConversationExport {
            conversation,
            turns,
        })
    }

    /// Append a turn and bump the conversation's `turn_count`/`updated_at`
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for over-long messages and
    /// storage errors otherwise.
    pub async fn append_turn(&self, new: NewTurn) -> Result<ConversationTurn, EngineError> {
        for (label, message) in [
            ("user_message", &new.user_message),
            ("assistant_message", &new.assistant_message),
        ] {
            let chars = message.chars().count();
            if chars > MAX_MESSAGE_CHARS {
                return Err(EngineError::Validation(format!(
                    "{label} length {chars} exceeds {MAX_MESSAGE_CHARS}"
                )));
            }
        }
        if new.turn_number < 0 {
            return Err(EngineError::Validation(
                "turn_number must be non-negative".to_owned(),
            ));
        }

        let turn = ConversationTurn {
            turn_id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            user_id: new.user_id,
            turn_number: new.turn_number,
            user_message: new.user_message,
            assistant_message: new.assistant_message,
            timestamp: Utc::now(),
            metadata: new.metadata,
            memories_retrieved: new.memories_retrieved,
            memories_created: new.memories_created,
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO conversation_turns (turn_id, conversation_id, user_id, turn_number, \
                 user_message, assistant_message, timestamp, metadata, memories_retrieved, \
                 memories_created) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(turn.turn_id.to_string())
        .bind(turn.conversation_id.to_string())
        .bind(&turn.user_id)
        .bind(turn.turn_number)
        .bind(&turn.user_message)
        .bind(&turn.assistant_message)
        .bind(format_ts(turn.timestamp))
        .bind(turn.metadata.to_string())
        .bind(uuid_list_json(&turn.memories_retrieved))
        .bind(uuid_list_json(&turn.memories_created))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations SET turn_count = turn_count + 1, updated_at = ?1 \
             WHERE conversation_id = ?2 AND user_id = ?3",
        )
        .bind(format_ts(turn.timestamp))
        .bind(turn.conversation_id.to_string())
        .bind(&turn.user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(turn = %turn.turn_id, number = turn.turn_number, "turn persisted");
        Ok(turn)
    }

    /// Record the memories created for an already-persisted turn.
    ///
    /// Called by the detached extraction task once it knows the ids.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn set_memories_created(
        &self,
        turn_id: Uuid,
        memory_ids: &[Uuid],
    ) -> Result<(), EngineError> {
        sqlx::query("UPDATE conversation_turns SET memories_created = ?1 WHERE turn_id = ?2")
            .bind(uuid_list_json(memory_ids))
            .bind(turn_id.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// The last `limit` turns of a conversation, chronological.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn tail(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turns \
             WHERE conversation_id = ?1 \
             ORDER BY turn_number DESC LIMIT ?2"
        ))
        .bind(conversation_id.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        let mut turns = rows
            .iter()
            .map(row_to_turn)
            .collect::<Result<Vec<_>, EngineError>>()?;
        turns.reverse();
        Ok(turns)
    }
}

const TURN_COLUMNS: &str = "turn_id, conversation_id, user_id, turn_number, user_message, \
     assistant_message, timestamp, metadata, memories_retrieved, memories_created";

fn sqlx_get(err: sqlx::Error) -> EngineError {
    EngineError::Internal(format!("row decode: {err}"))
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation, EngineError> {
    Ok(Conversation {
        conversation_id: parse_uuid(
            &row.try_get::<String, _>("conversation_id")
                .map_err(sqlx_get)?,
        )?,
        user_id: row.try_get("user_id").map_err(sqlx_get)?,
        title: row.try_get("title").map_err(sqlx_get)?,
        turn_count: row.try_get("turn_count").map_err(sqlx_get)?,
        is_archived: row.try_get::<i64, _>("is_archived").map_err(sqlx_get)? != 0,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(sqlx_get)?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(sqlx_get)?)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata").map_err(sqlx_get)?)
            .unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_turn(row: &SqliteRow) -> Result<ConversationTurn, EngineError> {
    Ok(ConversationTurn {
        turn_id: parse_uuid(&row.try_get::<String, _>("turn_id").map_err(sqlx_get)?)?,
        conversation_id: parse_uuid(
            &row.try_get::<String, _>("conversation_id")
                .map_err(sqlx_get)?,
        )?,
        user_id: row.try_get("user_id").map_err(sqlx_get)?,
        turn_number: row.try_get("turn_number").map_err(sqlx_get)?,
        user_message: row.try_get("user_message").map_err(sqlx_get)?,
        assistant_message: row.try_get("assistant_message").map_err(sqlx_get)?,
        timestamp: parse_ts(&row.try_get::<String, _>("timestamp").map_err(sqlx_get)?)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata").map_err(sqlx_get)?)
            .unwrap_or(serde_json::Value::Null),
        memories_retrieved: parse_uuid_list(
            &row.try_get::<String, _>("memories_retrieved")
                .map_err(sqlx_get)?,
        ),
        memories_created: parse_uuid_list(
            &row.try_get::<String, _>("memories_created")
                .map_err(sqlx_get)?,
        ),
    })
}
