//! Convenience wrappers that give [`super::TaskStateMachine`] transitions
//! semantic names matching the operations in §4.5.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use a2a_db::models::TaskStatus;
use a2a_db::queries::tasks as db;

use super::TaskStateMachine;

/// Dispatch a PENDING task to a worker under a fresh lease.
/// Transitions `PENDING -> RUNNING`.
pub async fn dispatch_task(pool: &PgPool, task_id: Uuid, lease_seconds: i32) -> Result<bool> {
    let rows = db::try_dispatch(pool, task_id, lease_seconds).await?;
    Ok(rows > 0)
}

/// Mark a task DONE with its result payload. Transitions `RUNNING -> DONE`.
pub async fn complete_task(pool: &PgPool, task_id: Uuid, result: &serde_json::Value) -> Result<bool> {
    let rows = db::complete_task(pool, task_id, result).await?;
    Ok(rows > 0)
}

/// Reschedule a failed task for retry. Transitions `RUNNING -> PENDING`
/// with an incremented `retry_count` and a scheduled `next_retry_ts`.
pub async fn retry_task(
    pool: &PgPool,
    task_id: Uuid,
    new_retry_count: i32,
    next_retry_ts: chrono::DateTime<chrono::Utc>,
    reason_code: Option<&str>,
    last_error: Option<&str>,
) -> Result<bool> {
    let rows = db::retry_to_pending(pool, task_id, new_retry_count, next_retry_ts, reason_code, last_error).await?;
    Ok(rows > 0)
}

/// Exhaust a task's retry budget, moving it to the dead-letter queue.
/// Transitions `RUNNING -> DLQ`.
pub async fn promote_to_dlq(
    pool: &PgPool,
    task_id: Uuid,
    new_retry_count: i32,
    reason_code: Option<&str>,
    last_error: Option<&str>,
) -> Result<bool> {
    let rows = db::promote_to_dlq_status(pool, task_id, new_retry_count, reason_code, last_error).await?;
    Ok(rows > 0)
}

/// Block a PENDING task because dependency evaluation found a failed or
/// missing dependency. Not part of the generic transition table -- see
/// [`super::TaskStateMachine`]'s module docs.
pub async fn block_task(pool: &PgPool, task_id: Uuid, reason_code: &str) -> Result<bool> {
    let rows = db::block_task(pool, task_id, reason_code).await?;
    Ok(rows > 0)
}
