//! Task state machine transitions.
//!
//! Validates and executes state transitions for tasks, enforcing the
//! allowed transition graph and optimistic locking. `BLOCKED` is
//! deliberately excluded from the generic transition table: it is only
//! entered as a side effect of dependency evaluation during dispatch or
//! result processing (always from `PENDING`), and only left when the
//! dead-letter entry tied to its triggering dependency is replayed, never
//! through the ordinary transition graph.

pub mod dispatch;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use a2a_db::models::TaskStatus;
use a2a_db::queries::tasks as db;

/// Error returned when a requested transition is not a legal edge in the
/// graph, or would change identity rather than status.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid state transition: {from} -> {to} for task {task_id}")]
    Invalid {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("optimistic lock failed: task {task_id} has status {actual}, expected {expected}")]
    Conflict {
        task_id: Uuid,
        actual: TaskStatus,
        expected: TaskStatus,
    },
}

/// The task state machine.
///
/// Enforces the valid transition graph from §4.4:
///
/// ```text
/// PENDING -> RUNNING
/// PENDING -> FAIL     (direct rejection, rare)
/// RUNNING -> DONE
/// RUNNING -> FAIL
/// RUNNING -> PENDING  (lease expiry or explicit re-queue)
/// FAIL    -> PENDING  (retry)
/// FAIL    -> DLQ      (retries exhausted)
/// ```
///
/// `status == target` is accepted as a no-op. Anything else is an
/// `INVALID_STATUS_TRANSITION` error. `BLOCKED` is handled outside this
/// table by [`dispatch::block_task`] and left only through DLQ replay.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph (not counting the `from == to` no-op, which callers
    /// should check separately since it bypasses the database write).
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Fail)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Fail)
                | (TaskStatus::Running, TaskStatus::Pending)
                | (TaskStatus::Fail, TaskStatus::Pending)
                | (TaskStatus::Fail, TaskStatus::Dlq)
        )
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// A no-op request (`from == to`) succeeds without touching the row.
    /// Returns [`TransitionError::Invalid`] if the edge is not in the
    /// graph, [`TransitionError::NotFound`] if the task does not exist,
    /// and [`TransitionError::Conflict`] if a concurrent writer already
    /// moved the task to a different status.
    pub async fn transition(pool: &PgPool, task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if from == to {
            return Ok(());
        }

        if !Self::is_valid_transition(from, to) {
            return Err(TransitionError::Invalid { task_id, from, to }.into());
        }

        let rows = db::transition_status(pool, task_id, from, to)
            .await
            .with_context(|| format!("failed to transition task {task_id} from {from} to {to}"))?;

        if rows == 0 {
            let task = db::get_task(pool, task_id).await?;
            return match task {
                None => Err(TransitionError::NotFound(task_id).into()),
                Some(t) => Err(TransitionError::Conflict {
                    task_id,
                    actual: t.status,
                    expected: from,
                }
                .into()),
            };
        }

        Ok(())
    }

    /// Validate that every dependency of `task_id` is `DONE`.
    ///
    /// Returns `Ok(true)` if all dependencies are satisfied, `Ok(false)`
    /// if any dependency is missing, `FAIL`, or `DLQ` (the caller should
    /// then block the task), or an error only on a genuine database
    /// failure. A still-`PENDING`/`RUNNING`/`BLOCKED` dependency also
    /// yields `Ok(false)` for "not yet ready", distinct from failure --
    /// callers that need to tell the two apart should inspect the
    /// dependency statuses directly.
    pub async fn dependencies_satisfied(pool: &PgPool, task_id: Uuid) -> Result<bool> {
        let task = db::get_task(pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        let dep_ids = task.dependency_ids();
        if dep_ids.is_empty() {
            return Ok(true);
        }

        let deps = db::get_many(pool, &dep_ids).await?;
        if deps.len() != dep_ids.len() {
            bail!("one or more dependencies of task {task_id} no longer exist");
        }

        Ok(deps.iter().all(|d| d.status == TaskStatus::Done))
    }

    /// Check whether any dependency of `task_id` is in a terminal failure
    /// state (`FAIL` or `DLQ`) or is missing entirely.
    pub async fn has_failed_dependency(pool: &PgPool, task_id: Uuid) -> Result<bool> {
        let task = db::get_task(pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        let dep_ids = task.dependency_ids();
        if dep_ids.is_empty() {
            return Ok(false);
        }

        let deps = db::get_many(pool, &dep_ids).await?;
        if deps.len() != dep_ids.len() {
            return Ok(true);
        }

        Ok(deps
            .iter()
            .any(|d| matches!(d.status, TaskStatus::Fail | TaskStatus::Dlq)))
    }
}
