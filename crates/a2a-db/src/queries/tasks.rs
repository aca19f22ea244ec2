//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Task, TaskStatus};

/// Parameters for inserting a new task. Grouped into a struct because
/// `insert_task` otherwise needs close to twenty positional arguments.
pub struct NewTask<'a> {
    pub task_code: &'a str,
    pub message_id: &'a str,
    pub instructions: &'a str,
    pub how_to_repro: &'a str,
    pub expected: &'a str,
    pub evidence_requirements: &'a str,
    pub owner_role: &'a str,
    pub area: &'a str,
    pub priority: i32,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub retry_backoff_sec: i32,
    pub agent_id: &'a str,
    pub worker_type: Option<&'a str>,
    pub routing_decision: &'a str,
    pub trace_id: Uuid,
    pub dependencies: serde_json::Value,
}

/// Outcome of [`insert_task`]: either a freshly inserted row, or the row
/// that already existed for this `message_id`.
pub enum InsertOutcome {
    Inserted(Task),
    Existing(Task),
}

/// Insert a new task row, honoring the partial unique index on
/// `message_id`. If a concurrent caller already inserted a task with the
/// same `message_id`, the conflict is swallowed and the existing row is
/// re-read and returned instead.
pub async fn insert_task(pool: &PgPool, new: NewTask<'_>) -> Result<InsertOutcome> {
    let inserted = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks ( \
            task_code, message_id, instructions, how_to_repro, expected, \
            evidence_requirements, owner_role, area, priority, status, \
            deadline, timeout_seconds, max_retries, retry_backoff_sec, \
            retry_count, agent_id, worker_type, routing_decision, trace_id, \
            dependencies \
         ) VALUES ( \
            $1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING', \
            $10, $11, $12, $13, 0, $14, $15, $16, $17, $18 \
         ) \
         ON CONFLICT (message_id) WHERE message_id IS NOT NULL DO NOTHING \
         RETURNING *",
    )
    .bind(new.task_code)
    .bind(new.message_id)
    .bind(new.instructions)
    .bind(new.how_to_repro)
    .bind(new.expected)
    .bind(new.evidence_requirements)
    .bind(new.owner_role)
    .bind(new.area)
    .bind(new.priority)
    .bind(new.deadline)
    .bind(new.timeout_seconds)
    .bind(new.max_retries)
    .bind(new.retry_backoff_sec)
    .bind(new.agent_id)
    .bind(new.worker_type)
    .bind(new.routing_decision)
    .bind(new.trace_id)
    .bind(new.dependencies)
    .fetch_optional(pool)
    .await
    .context("failed to insert task")?;

    match inserted {
        Some(task) => Ok(InsertOutcome::Inserted(task)),
        None => {
            let existing = get_task_by_message_id(pool, new.message_id)
                .await?
                .context("insert conflicted on message_id but no existing row was found")?;
            Ok(InsertOutcome::Existing(existing))
        }
    }
}

/// Fetch a single task by its opaque identity.
pub async fn get_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;
    Ok(task)
}

/// Fetch a task by its idempotency key.
pub async fn get_task_by_message_id(pool: &PgPool, message_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE message_id = $1")
        .bind(message_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task by message_id")?;
    Ok(task)
}

/// Fetch the most recently created task with the given display label.
/// `task_code` is not an identity, so multiple rows may match; the most
/// recent one is used for `result()`'s identity-resolution fallback.
pub async fn get_task_by_code_most_recent(pool: &PgPool, task_code: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE task_code = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(task_code)
    .fetch_optional(pool)
    .await
    .context("failed to fetch task by task_code")?;
    Ok(task)
}

/// Fetch every task referenced by `ids`, in no particular order.
pub async fn get_many(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Task>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE task_id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .context("failed to fetch tasks by id list")?;
    Ok(tasks)
}

/// List every task. Used by Workflow Recovery, which needs the full
/// dependency graph in memory to evaluate cross-task invariants.
pub async fn list_all(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at ASC")
        .fetch_all(pool)
        .await
        .context("failed to list all tasks")?;
    Ok(tasks)
}

/// Atomically transition a task's status, stamping `updated_at`.
///
/// Optimistic locking: the `WHERE` clause requires the row's current
/// status to equal `from`. Returns the number of rows affected (0 means
/// the status had already moved, or the row doesn't exist).
pub async fn transition_status(pool: &PgPool, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET status = $1, updated_at = NOW() WHERE task_id = $2 AND status = $3")
        .bind(to)
        .bind(task_id)
        .bind(from)
        .execute(pool)
        .await
        .context("failed to transition task status")?;
    Ok(result.rows_affected())
}

/// `next()` step 5: atomically move a PENDING task to RUNNING under a
/// fresh lease. Zero rows affected means a concurrent caller won the race.
pub async fn try_dispatch(pool: &PgPool, task_id: Uuid, lease_seconds: i32) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'RUNNING', updated_at = NOW(), next_retry_ts = NULL, \
             lease_expiry_ts = NOW() + make_interval(secs => $1), lease_seconds = $1 \
         WHERE task_id = $2 AND status = 'PENDING'",
    )
    .bind(lease_seconds)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to dispatch task")?;
    Ok(result.rows_affected())
}

/// ACK-recovery fast path: the most recently updated RUNNING task this
/// agent currently holds a live lease on.
pub async fn get_live_lease_for_agent(pool: &PgPool, agent_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'RUNNING' AND agent_id = $1 AND lease_expiry_ts > NOW() \
         ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
    .context("failed to look up live lease")?
    .into_iter()
    .next();
    Ok(task)
}

/// Extend the lease on a RUNNING task in place (ACK-recovery re-delivery
/// and `heartbeat()` both call this; both must bump `updated_at` in the
/// same transaction as the extension per design note (c)).
pub async fn extend_lease(pool: &PgPool, task_id: Uuid, lease_seconds: i32) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        "UPDATE tasks \
         SET lease_expiry_ts = NOW() + make_interval(secs => $1), lease_seconds = $1, updated_at = NOW() \
         WHERE task_id = $2 AND status = 'RUNNING' \
         RETURNING lease_expiry_ts",
    )
    .bind(lease_seconds)
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to extend lease")?;
    Ok(row.map(|(ts,)| ts))
}

/// Candidate PENDING tasks for dispatch to `agent_id`, in the order
/// required by §4.5 step 3: tasks with no scheduled retry delay first,
/// then highest priority, then oldest first.
pub async fn candidates_for_agent(pool: &PgPool, agent_id: &str, owner_role: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'PENDING' AND agent_id = $1 AND owner_role = $2 \
           AND (next_retry_ts IS NULL OR next_retry_ts <= NOW()) \
         ORDER BY (CASE WHEN next_retry_ts IS NULL THEN 0 ELSE 1 END) ASC, \
                  priority DESC, created_at ASC",
    )
    .bind(agent_id)
    .bind(owner_role)
    .fetch_all(pool)
    .await
    .context("failed to list dispatch candidates")?;
    Ok(tasks)
}

/// Move a PENDING candidate to BLOCKED because dependency evaluation failed
/// (a dependency is FAIL/DLQ or missing entirely).
pub async fn block_task(pool: &PgPool, task_id: Uuid, reason_code: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'BLOCKED', reason_code = $1, updated_at = NOW() \
         WHERE task_id = $2 AND status = 'PENDING'",
    )
    .bind(reason_code)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to block task")?;
    Ok(result.rows_affected())
}

/// `result()` DONE branch: clear failure fields, store the result payload,
/// transition RUNNING -> DONE.
pub async fn complete_task(pool: &PgPool, task_id: Uuid, result: &serde_json::Value) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE tasks \
         SET status = 'DONE', result = $1, reason_code = NULL, last_error = NULL, updated_at = NOW() \
         WHERE task_id = $2 AND status = 'RUNNING'",
    )
    .bind(result)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to complete task")?;
    Ok(res.rows_affected())
}

/// `result()` FAIL branch, retry-eligible case: RUNNING -> PENDING with a
/// scheduled retry time and an incremented `retry_count`.
pub async fn retry_to_pending(
    pool: &PgPool,
    task_id: Uuid,
    new_retry_count: i32,
    next_retry_ts: DateTime<Utc>,
    reason_code: Option<&str>,
    last_error: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'PENDING', retry_count = $1, next_retry_ts = $2, \
             lease_expiry_ts = NULL, reason_code = $3, last_error = $4, updated_at = NOW() \
         WHERE task_id = $5 AND status = 'RUNNING'",
    )
    .bind(new_retry_count)
    .bind(next_retry_ts)
    .bind(reason_code)
    .bind(last_error)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to retry task to pending")?;
    Ok(result.rows_affected())
}

/// `result()` FAIL branch, retries-exhausted case: RUNNING -> DLQ.
pub async fn promote_to_dlq_status(
    pool: &PgPool,
    task_id: Uuid,
    new_retry_count: i32,
    reason_code: Option<&str>,
    last_error: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'DLQ', retry_count = $1, reason_code = $2, last_error = $3, updated_at = NOW() \
         WHERE task_id = $4 AND status = 'RUNNING'",
    )
    .bind(new_retry_count)
    .bind(reason_code)
    .bind(last_error)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to promote task to DLQ")?;
    Ok(result.rows_affected())
}

/// Lease Sweeper: reclaim every RUNNING task whose lease has expired.
/// Idempotent -- a second run finds no matching rows.
pub async fn sweep_expired_leases(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'PENDING', lease_expiry_ts = NULL, next_retry_ts = NULL, updated_at = NOW() \
         WHERE status = 'RUNNING' AND lease_expiry_ts < NOW() \
         RETURNING *",
    )
    .fetch_all(pool)
    .await
    .context("failed to sweep expired leases")?;
    Ok(tasks)
}

/// Priority Ager: bump the priority of every PENDING task that has waited
/// longer than `aging_threshold_secs` and has not yet hit `max_priority`.
pub async fn age_priorities(
    pool: &PgPool,
    aging_threshold_secs: i64,
    aging_step: i32,
    max_priority: i32,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET priority = LEAST(priority + $1, $2), updated_at = NOW() \
         WHERE status = 'PENDING' \
           AND priority < $2 \
           AND NOW() - created_at > make_interval(secs => $3) \
         RETURNING *",
    )
    .bind(aging_step)
    .bind(max_priority)
    .bind(aging_threshold_secs)
    .fetch_all(pool)
    .await
    .context("failed to age task priorities")?;
    Ok(tasks)
}

/// Failure propagation (§4.5 step 6): every PENDING task whose
/// `dependencies` array contains `task_id`.
pub async fn list_pending_dependents(pool: &PgPool, task_id: Uuid) -> Result<Vec<Task>> {
    let needle = serde_json::Value::String(task_id.to_string());
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = 'PENDING' AND dependencies @> jsonb_build_array($1::text)",
    )
    .bind(needle.as_str())
    .fetch_all(pool)
    .await
    .context("failed to list pending dependents")?;
    Ok(tasks)
}

/// Recovery repair: force a RUNNING task with an invalid lease back to
/// PENDING, unconditionally (no optimistic lock needed -- this runs during
/// single-writer recovery at startup or via an explicit operator call).
pub async fn force_requeue(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'PENDING', lease_expiry_ts = NULL, next_retry_ts = NULL, updated_at = NOW() \
         WHERE task_id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to force-requeue task")?;
    Ok(result.rows_affected())
}

/// Recovery repair: force a task whose dependency failed into FAIL status.
pub async fn force_fail(pool: &PgPool, task_id: Uuid, reason_code: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'FAIL', reason_code = $1, updated_at = NOW() WHERE task_id = $2",
    )
    .bind(reason_code)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to force-fail task")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_struct_is_constructible() {
        let _ = NewTask {
            task_code: "T1",
            message_id: "m1",
            instructions: "i",
            how_to_repro: "h",
            expected: "e",
            evidence_requirements: "ev",
            owner_role: "SRE Engineer",
            area: "ci/exchange",
            priority: 0,
            deadline: None,
            timeout_seconds: 600,
            max_retries: 3,
            retry_backoff_sec: 30,
            agent_id: "a1",
            worker_type: Some("Trae"),
            routing_decision: "Matched by R1: area = ci/exchange",
            trace_id: Uuid::new_v4(),
            dependencies: serde_json::json!([]),
        };
    }
}
