//! Single-writer actor for deferred access accounting.
//!
//! Retrieval queues [`AccessOp`] batches; this actor applies them to the row
//! store one statement at a time. Counters are eventually consistent —
//! scoring tolerates slightly stale values, and a dropped batch only delays
//! usage boosts.

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, trace};
use uuid::Uuid;

use super::format_ts;

/// Operations accepted by the access actor.
#[derive(Debug)]
pub enum AccessOp {
    /// Record that a retrieval surfaced these memories at `turn`.
    Touch {
        /// Memories returned by the retrieval.
        memory_ids: Vec<Uuid>,
        /// Turn number of the retrieval.
        turn: i64,
    },
}

/// Run the access-accounting actor loop.
///
/// Processes [`AccessOp`] batches until the sender half is dropped.
pub async fn run_access_actor(db: SqlitePool, mut rx: mpsc::Receiver<AccessOp>) {
    while let Some(op) = rx.recv().await {
        if let Err(err) = handle_op(&db, &op).await {
            error!(?op, error = %err, "access accounting failed");
        }
    }
    trace!("access actor stopped");
}

async fn handle_op(db: &SqlitePool, op: &AccessOp) -> Result<(), sqlx::Error> {
    match op {
        AccessOp::Touch { memory_ids, turn } => {
            let now = format_ts(Utc::now());
            for memory_id in memory_ids {
                sqlx::query(
                    "UPDATE memories \
                     SET access_count = access_count + 1, last_accessed = ?1, last_used_turn = ?2 \
                     WHERE memory_id = ?3",
                )
                .bind(&now)
                .bind(turn)
                .bind(memory_id.to_string())
                .execute(db)
                .await?;
            }
            trace!(count = memory_ids.len(), turn, "access batch applied");
        }
    }
    Ok(())
}
