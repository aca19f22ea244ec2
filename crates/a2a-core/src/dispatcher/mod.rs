//! Dispatcher (§4.5): `create`, `next`, `heartbeat`, `result`. The biggest
//! single component -- it is the only place assignment, lease extension,
//! dependency gating, retry/DLQ promotion, and failure propagation meet.
//!
//! Threads a bare `&PgPool` through a sequence of guarded, idempotent
//! queries rather than a single long-lived `sqlx::Transaction` -- every step
//! that needs atomicity already gets it from a conditional
//! `UPDATE ... WHERE status = ...` or an `ON CONFLICT` clause, so a
//! caller-visible retry loop (step 4f's "restart at 4a") plays the same role
//! a transaction would.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use a2a_db::models::{Task, TaskStatus};
use a2a_db::queries::tasks as task_db;

use crate::error::DispatchError;
use crate::metrics::Metrics;
use crate::registry;
use crate::routing::{self, TaskAttrs};
use crate::state::dispatch as state_dispatch;
use crate::state::TaskStateMachine;
use crate::verifier::{canonical_pack, looks_like_canonical_pack, looks_like_signed_pointer, signature};

const DEFAULT_LEASE_SECONDS: i32 = 60;
const DEFAULT_PRIORITY: i32 = 0;
const MIN_PRIORITY: i32 = 0;
const MAX_PRIORITY: i32 = 3;
const DEFAULT_TIMEOUT_SECONDS: i32 = 600;
const DEFAULT_MAX_RETRIES: i32 = 3;
const DEFAULT_RETRY_BACKOFF_SEC: i32 = 30;
const MAX_RETRY_BACKOFF_SEC: i64 = 3600;
const MAX_CREATE_ATTEMPTS: u32 = 5;

/// Input to [`create`]. Required fields are validated non-empty; optional
/// fields fall back to the defaults named in §4.5 / §3.
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub task_code: String,
    pub area: String,
    pub owner_role: String,
    pub instructions: String,
    pub how_to_repro: String,
    pub expected: String,
    pub evidence_requirements: String,
    pub message_id: Option<String>,
    pub priority: Option<i32>,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub retry_backoff_sec: Option<i32>,
    pub dependencies: Vec<Uuid>,
}

/// Create a task, routing and assigning it to an eligible agent in the same
/// operation (§4.5 `create`).
pub async fn create(pool: &PgPool, metrics: &Metrics, req: CreateTaskRequest) -> Result<Task, DispatchError> {
    validate_required(&req)?;

    let message_id = req
        .message_id
        .clone()
        .unwrap_or_else(|| format!("legacy:{}", req.task_code));

    let routing = routing::decide(
        pool,
        &TaskAttrs {
            task_code: req.task_code.clone(),
            area: req.area.clone(),
            owner_role: req.owner_role.clone(),
            priority: req.priority.unwrap_or(DEFAULT_PRIORITY),
        },
    )
    .await?;

    for _ in 0..MAX_CREATE_ATTEMPTS {
        if let Some(existing) = task_db::get_task_by_message_id(pool, &message_id).await? {
            return Ok(existing);
        }

        let agent = registry::select_eligible_agent(
            pool,
            &req.owner_role,
            &routing.worker_type,
            &req.instructions,
        )
        .await?;

        let Some(agent) = agent else {
            return Err(DispatchError::AgentQuotaExceeded);
        };

        let priority = req
            .priority
            .unwrap_or(DEFAULT_PRIORITY)
            .clamp(MIN_PRIORITY, MAX_PRIORITY);
        let dependencies = serde_json::Value::Array(
            req.dependencies
                .iter()
                .map(|id| serde_json::Value::String(id.to_string()))
                .collect(),
        );

        let new_task = task_db::NewTask {
            task_code: &req.task_code,
            message_id: &message_id,
            instructions: &req.instructions,
            how_to_repro: &req.how_to_repro,
            expected: &req.expected,
            evidence_requirements: &req.evidence_requirements,
            owner_role: &req.owner_role,
            area: &req.area,
            priority,
            deadline: req.deadline,
            timeout_seconds: req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            max_retries: req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_backoff_sec: req.retry_backoff_sec.unwrap_or(DEFAULT_RETRY_BACKOFF_SEC),
            agent_id: &agent.agent_id,
            worker_type: Some(routing.worker_type.as_str()),
            routing_decision: &routing.decision,
            trace_id: routing.trace_id,
            dependencies,
        };

        match task_db::insert_task(pool, new_task).await? {
            task_db::InsertOutcome::Inserted(task) => {
                registry::take_capacity(pool, &agent.agent_id).await?;
                metrics.task_created();
                tracing::info!(
                    task_id = %task.task_id,
                    task_code = %task.task_code,
                    agent_id = %agent.agent_id,
                    worker_type = %routing.worker_type,
                    "TASK_CREATED"
                );
                return Ok(task);
            }
            task_db::InsertOutcome::Existing(task) => return Ok(task),
        }
    }

    Err(DispatchError::Conflict(
        "too many concurrent create attempts on the same message_id".into(),
    ))
}

fn validate_required(req: &CreateTaskRequest) -> Result<(), DispatchError> {
    let fields: &[(&str, &str)] = &[
        ("task_code", &req.task_code),
        ("area", &req.area),
        ("owner_role", &req.owner_role),
        ("instructions", &req.instructions),
        ("how_to_repro", &req.how_to_repro),
        ("expected", &req.expected),
        ("evidence_requirements", &req.evidence_requirements),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(DispatchError::InvalidTaskTemplate(format!("missing {name}")));
        }
    }
    Ok(())
}

/// Outcome of [`next`].
pub enum NextTask {
    Task(Task),
    None,
}

/// Return at most one task for `agent_id`, atomically moving it from
/// `PENDING` to `RUNNING` (§4.5 `next`).
pub async fn next(pool: &PgPool, metrics: &Metrics, agent_id: &str) -> Result<NextTask, DispatchError> {
    let Some(agent) = registry::get(pool, agent_id).await? else {
        return Ok(NextTask::None);
    };

    if let Some(task) = task_db::get_live_lease_for_agent(pool, agent_id).await? {
        // §9(c): ACK-recovery reuses the previous `lease_seconds` rather
        // than resetting to the default.
        let lease_seconds = if task.lease_seconds > 0 {
            task.lease_seconds
        } else {
            DEFAULT_LEASE_SECONDS
        };
        let _ = task_db::extend_lease(pool, task.task_id, lease_seconds).await?;
        let refreshed = task_db::get_task(pool, task.task_id).await?.ok_or(DispatchError::TaskNotFound)?;
        return Ok(NextTask::Task(refreshed));
    }

    let candidates = task_db::candidates_for_agent(pool, agent_id, &agent.owner_role).await?;

    for candidate in candidates {
        if TaskStateMachine::has_failed_dependency(pool, candidate.task_id).await? {
            state_dispatch::block_task(pool, candidate.task_id, "dep_failed").await?;
            continue;
        }

        if !TaskStateMachine::dependencies_satisfied(pool, candidate.task_id).await? {
            continue;
        }

        // Exactly one candidate is selected; the conditional update either
        // wins it (affected_rows=1) or a concurrent caller already took it
        // (affected_rows=0), in which case `next` reports no task rather
        // than falling through to the next candidate.
        if state_dispatch::dispatch_task(pool, candidate.task_id, DEFAULT_LEASE_SECONDS).await? {
            let dispatched = task_db::get_task(pool, candidate.task_id)
                .await?
                .ok_or(DispatchError::TaskNotFound)?;
            return Ok(NextTask::Task(dispatched));
        }
        return Ok(NextTask::None);
    }

    let _ = metrics;
    Ok(NextTask::None)
}

/// Extend a RUNNING task's lease (§4.5 `heartbeat`). Returns the new expiry.
pub async fn heartbeat(pool: &PgPool, task_id: Uuid) -> Result<DateTime<Utc>, DispatchError> {
    let task = task_db::get_task(pool, task_id).await?.ok_or(DispatchError::TaskNotFound)?;
    if task.status != TaskStatus::Running {
        return Err(DispatchError::InvalidStatusTransition {
            task_id,
            from: task.status.to_string(),
            to: TaskStatus::Running.to_string(),
        });
    }
    let lease_seconds = if task.lease_seconds > 0 {
        task.lease_seconds
    } else {
        DEFAULT_LEASE_SECONDS
    };
    let expiry = task_db::extend_lease(pool, task_id, lease_seconds)
        .await?
        .ok_or(DispatchError::TaskNotFound)?;
    Ok(expiry)
}

/// How the caller identified the task in [`result`]: `task_id`,
/// `message_id`, or most-recent `task_code`.
pub enum Identity<'a> {
    TaskId(Uuid),
    MessageId(&'a str),
    TaskCode(&'a str),
}

/// Submit a result for a task (§4.5 `result`). Resolves identity, verifies
/// any signed or canonical-pack payload, validates the transition, applies
/// it, and propagates failure to dependents.
pub async fn result(
    pool: &PgPool,
    metrics: &Metrics,
    secret_key: &[u8],
    identity: Identity<'_>,
    status: Option<TaskStatus>,
    result_payload: Option<serde_json::Value>,
    reason_code: Option<&str>,
    last_error: Option<&str>,
) -> Result<Task, DispatchError> {
    let task = resolve_identity(pool, identity).await?;

    if let Some(payload) = &result_payload {
        if looks_like_signed_pointer(payload) {
            signature::verify(payload, secret_key, Utc::now())?;
        } else if looks_like_canonical_pack(payload) {
            canonical_pack::validate(payload)?;
        }
    }

    let target = status.unwrap_or(if result_payload.is_some() {
        TaskStatus::Done
    } else {
        TaskStatus::Running
    });

    if target == task.status {
        // §4.4: "status==target is accepted as a no-op." The DONE/FAIL
        // branches below assume a RUNNING source row and would otherwise
        // misreport this as a conflict.
        return Ok(task);
    }

    if !TaskStateMachine::is_valid_transition(task.status, target) {
        return Err(DispatchError::InvalidStatusTransition {
            task_id: task.task_id,
            from: task.status.to_string(),
            to: target.to_string(),
        });
    }

    let final_status = match target {
        TaskStatus::Done => {
            let payload = result_payload.unwrap_or(serde_json::Value::Null);
            if !state_dispatch::complete_task(pool, task.task_id, &payload).await? {
                return Err(DispatchError::Conflict(format!(
                    "task {} was no longer RUNNING",
                    task.task_id
                )));
            }
            if let Some(agent_id) = &task.agent_id {
                registry::release_capacity(pool, agent_id).await?;
                registry::record_completion(pool, agent_id).await?;
            }
            metrics.task_done();
            TaskStatus::Done
        }
        TaskStatus::Fail => {
            let new_retry_count = task.retry_count + 1;
            if new_retry_count <= task.max_retries {
                let delay_secs = std::cmp::min(
                    (task.retry_backoff_sec as i64) * 2i64.pow((new_retry_count - 1).max(0) as u32),
                    MAX_RETRY_BACKOFF_SEC,
                );
                let next_retry_ts = Utc::now() + chrono::Duration::seconds(delay_secs);
                if !state_dispatch::retry_task(
                    pool,
                    task.task_id,
                    new_retry_count,
                    next_retry_ts,
                    reason_code,
                    last_error,
                )
                .await?
                {
                    return Err(DispatchError::Conflict(format!(
                        "task {} was no longer RUNNING",
                        task.task_id
                    )));
                }
                // Retry does not release the agent's capacity slot (§9 note
                // (b)): the task stays attributed to its current agent_id
                // until a terminal DONE/DLQ outcome frees it.
                metrics.queue_depth_inc();
                TaskStatus::Pending
            } else {
                if !state_dispatch::promote_to_dlq(
                    pool,
                    task.task_id,
                    new_retry_count,
                    reason_code,
                    last_error,
                )
                .await?
                {
                    return Err(DispatchError::Conflict(format!(
                        "task {} was no longer RUNNING",
                        task.task_id
                    )));
                }
                let snapshot = task_db::get_task(pool, task.task_id)
                    .await?
                    .ok_or(DispatchError::TaskNotFound)?;
                crate::dlq::capture(pool, &snapshot, reason_code, last_error).await?;
                if let Some(agent_id) = &task.agent_id {
                    registry::release_capacity(pool, agent_id).await?;
                }
                metrics.task_failed();
                TaskStatus::Dlq
            }
        }
        other => {
            TaskStateMachine::transition(pool, task.task_id, task.status, other).await?;
            other
        }
    };

    if matches!(final_status, TaskStatus::Fail | TaskStatus::Dlq) {
        propagate_failure(pool, task.task_id).await?;
    }

    let updated = task_db::get_task(pool, task.task_id)
        .await?
        .ok_or(DispatchError::TaskNotFound)?;

    tracing::info!(
        task_id = %task.task_id,
        status = %final_status,
        "RESULT_SUBMITTED"
    );

    Ok(updated)
}

async fn resolve_identity(pool: &PgPool, identity: Identity<'_>) -> Result<Task, DispatchError> {
    let task = match identity {
        Identity::TaskId(id) => task_db::get_task(pool, id).await?,
        Identity::MessageId(mid) => task_db::get_task_by_message_id(pool, mid).await?,
        Identity::TaskCode(code) => task_db::get_task_by_code_most_recent(pool, code).await?,
    };
    task.ok_or(DispatchError::TaskNotFound)
}

/// §4.5 step 6: when a task reaches `FAIL` or `DLQ`, every `PENDING` task
/// that depends on it moves to `BLOCKED` with `reason_code=dep_failed`.
async fn propagate_failure(pool: &PgPool, task_id: Uuid) -> anyhow::Result<()> {
    let dependents = task_db::list_pending_dependents(pool, task_id).await?;
    for dependent in dependents {
        state_dispatch::block_task(pool, dependent.task_id, "dep_failed").await?;
    }
    Ok(())
}
