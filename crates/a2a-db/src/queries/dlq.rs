//! Database query functions for the `dlq_entries` table.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::models::DlqEntry;
use sqlx::PgPool;

/// Snapshot a task into the dead-letter queue. The snapshot is immutable;
/// only the `replay_*` audit fields are ever updated afterwards.
pub async fn insert(
    pool: &PgPool,
    task_id: Uuid,
    task_code: &str,
    message_id: Option<&str>,
    snapshot: &serde_json::Value,
    reason_code: Option<&str>,
    last_error: Option<&str>,
    trace_id: Option<Uuid>,
) -> Result<DlqEntry> {
    let entry = sqlx::query_as::<_, DlqEntry>(
        "INSERT INTO dlq_entries ( \
            dlq_id, task_id, task_code, message_id, snapshot, reason_code, last_error, trace_id \
         ) VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(task_code)
    .bind(message_id)
    .bind(snapshot)
    .bind(reason_code)
    .bind(last_error)
    .bind(trace_id)
    .fetch_one(pool)
    .await
    .context("failed to insert dlq entry")?;
    Ok(entry)
}

pub async fn get(pool: &PgPool, dlq_id: Uuid) -> Result<Option<DlqEntry>> {
    let entry = sqlx::query_as::<_, DlqEntry>("SELECT * FROM dlq_entries WHERE dlq_id = $1")
        .bind(dlq_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch dlq entry")?;
    Ok(entry)
}

pub async fn get_by_task_code(pool: &PgPool, task_code: &str) -> Result<Option<DlqEntry>> {
    let entry = sqlx::query_as::<_, DlqEntry>(
        "SELECT * FROM dlq_entries WHERE task_code = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(task_code)
    .fetch_optional(pool)
    .await
    .context("failed to fetch dlq entry by task_code")?;
    Ok(entry)
}

pub async fn get_by_message_id(pool: &PgPool, message_id: &str) -> Result<Option<DlqEntry>> {
    let entry = sqlx::query_as::<_, DlqEntry>(
        "SELECT * FROM dlq_entries WHERE message_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch dlq entry by message_id")?;
    Ok(entry)
}

pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<DlqEntry>> {
    let entries = sqlx::query_as::<_, DlqEntry>(
        "SELECT * FROM dlq_entries ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list dlq entries")?;
    Ok(entries)
}

pub async fn count(pool: &PgPool) -> Result<i64> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dlq_entries")
        .fetch_one(pool)
        .await
        .context("failed to count dlq entries")?;
    Ok(total)
}

/// Stamp the audit fields on replay. Does not touch the snapshot itself.
pub async fn record_replay(pool: &PgPool, dlq_id: Uuid, replay_who: &str, replay_why: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE dlq_entries SET replay_who = $1, replay_when = NOW(), replay_why = $2 WHERE dlq_id = $3",
    )
    .bind(replay_who)
    .bind(replay_why)
    .bind(dlq_id)
    .execute(pool)
    .await
    .context("failed to record dlq replay")?;
    Ok(result.rows_affected())
}
