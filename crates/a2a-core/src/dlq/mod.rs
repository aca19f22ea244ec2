//! DLQ & Replay (§4.6): captures exhausted tasks with full context and
//! supports audited replay back to `PENDING` with a safety guard against
//! replaying against an already-`DONE` task.
//!
//! Pairs each status flip with an audit-trail write in the same operation.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use a2a_db::models::{DlqEntry, Task, TaskStatus};
use a2a_db::queries::dlq as dlq_db;
use a2a_db::queries::tasks as task_db;

use crate::error::DispatchError;

/// Snapshot `task` into the dead-letter queue. Does not itself flip the
/// task's status -- callers already transitioned it to `DLQ` via
/// [`crate::state::dispatch::promote_to_dlq`] before calling this.
pub async fn capture(
    pool: &PgPool,
    task: &Task,
    reason_code: Option<&str>,
    last_error: Option<&str>,
) -> anyhow::Result<DlqEntry> {
    let snapshot = serde_json::to_value(task).context("failed to serialize task snapshot")?;
    dlq_db::insert(
        pool,
        task.task_id,
        &task.task_code,
        task.message_id.as_deref(),
        &snapshot,
        reason_code,
        last_error,
        task.trace_id,
    )
    .await
}

pub async fn get(pool: &PgPool, dlq_id: Uuid) -> anyhow::Result<Option<DlqEntry>> {
    dlq_db::get(pool, dlq_id).await
}

pub async fn get_by_task_code(pool: &PgPool, task_code: &str) -> anyhow::Result<Option<DlqEntry>> {
    dlq_db::get_by_task_code(pool, task_code).await
}

pub async fn get_by_message_id(pool: &PgPool, message_id: &str) -> anyhow::Result<Option<DlqEntry>> {
    dlq_db::get_by_message_id(pool, message_id).await
}

pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<DlqEntry>> {
    dlq_db::list(pool, limit, offset).await
}

pub async fn count(pool: &PgPool) -> anyhow::Result<i64> {
    dlq_db::count(pool).await
}

/// Replay a DLQ entry back to `PENDING`.
///
/// 1. Load the entry and parse its snapshot.
/// 2. Refuse if the current task row is `DONE` (a stale DLQ row replayed
///    against a now-succeeded task would duplicate effects).
/// 3. If the task row still exists, reset it to a fresh `PENDING` state.
///    Otherwise re-insert it from the snapshot, preserving `task_id`.
/// 4. Stamp the DLQ row's replay audit fields.
pub async fn replay(pool: &PgPool, dlq_id: Uuid, who: &str, why: &str) -> Result<Task, DispatchError> {
    let entry = dlq_db::get(pool, dlq_id)
        .await?
        .ok_or(DispatchError::DlqEntryNotFound)?;

    let current = task_db::get_task(pool, entry.task_id).await?;

    if let Some(task) = &current {
        if task.status == TaskStatus::Done {
            return Err(DispatchError::ReplayForbidden);
        }
    }

    let replayed = match current {
        Some(_) => {
            let rows = reset_to_pending(pool, entry.task_id).await?;
            if rows == 0 {
                return Err(DispatchError::Conflict(format!(
                    "task {} changed status during replay",
                    entry.task_id
                )));
            }
            task_db::get_task(pool, entry.task_id)
                .await?
                .ok_or(DispatchError::TaskNotFound)?
        }
        None => reinsert_from_snapshot(pool, &entry).await?,
    };

    dlq_db::record_replay(pool, dlq_id, who, why).await?;

    Ok(replayed)
}

/// Reset an existing task row to a clean `PENDING` state regardless of its
/// current status -- replay is an explicit operator override, not a normal
/// state-machine edge, so it bypasses the optimistic-lock transition table.
async fn reset_to_pending(pool: &PgPool, task_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'PENDING', retry_count = 0, next_retry_ts = NULL, \
            lease_expiry_ts = NULL, reason_code = NULL, last_error = NULL, updated_at = NOW() \
         WHERE task_id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to reset task to pending for replay")?;
    Ok(result.rows_affected())
}

/// Re-insert a task from its DLQ snapshot when the original row is gone,
/// preserving `task_id` so downstream references (dependents, audit trails)
/// stay valid.
async fn reinsert_from_snapshot(pool: &PgPool, entry: &DlqEntry) -> anyhow::Result<Task> {
    let mut snapshot: Task = serde_json::from_value(entry.snapshot.clone())
        .context("failed to deserialize dlq snapshot")?;
    snapshot.status = TaskStatus::Pending;
    snapshot.retry_count = 0;
    snapshot.next_retry_ts = None;
    snapshot.lease_expiry_ts = None;
    snapshot.reason_code = None;
    snapshot.last_error = None;

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks ( \
            task_id, task_code, message_id, instructions, how_to_repro, expected, \
            evidence_requirements, owner_role, area, priority, status, deadline, \
            timeout_seconds, max_retries, retry_backoff_sec, retry_count, next_retry_ts, \
            lease_seconds, lease_expiry_ts, agent_id, worker_type, routing_decision, \
            trace_id, dependencies \
         ) VALUES ( \
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'PENDING', $11, \
            $12, $13, $14, 0, NULL, $15, NULL, $16, $17, $18, $19, $20 \
         ) \
         ON CONFLICT (task_id) DO UPDATE SET \
            status = 'PENDING', retry_count = 0, next_retry_ts = NULL, \
            lease_expiry_ts = NULL, reason_code = NULL, last_error = NULL, updated_at = NOW() \
         RETURNING *",
    )
    .bind(snapshot.task_id)
    .bind(&snapshot.task_code)
    .bind(&snapshot.message_id)
    .bind(&snapshot.instructions)
    .bind(&snapshot.how_to_repro)
    .bind(&snapshot.expected)
    .bind(&snapshot.evidence_requirements)
    .bind(&snapshot.owner_role)
    .bind(&snapshot.area)
    .bind(snapshot.priority)
    .bind(snapshot.deadline)
    .bind(snapshot.timeout_seconds)
    .bind(snapshot.max_retries)
    .bind(snapshot.retry_backoff_sec)
    .bind(snapshot.lease_seconds)
    .bind(&snapshot.agent_id)
    .bind(&snapshot.worker_type)
    .bind(&snapshot.routing_decision)
    .bind(snapshot.trace_id)
    .bind(&snapshot.dependencies)
    .fetch_one(pool)
    .await
    .context("failed to reinsert task from dlq snapshot")?;
    Ok(task)
}
