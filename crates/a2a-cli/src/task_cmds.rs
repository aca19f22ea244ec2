//! `a2ahub task ...` / `a2ahub routing decide`: direct CLI wrappers around
//! the Dispatcher and Routing Engine for operators who don't want to speak
//! HTTP. Each sub-command parses its arguments, opens a pool, calls
//! straight into `a2a-core`, and prints a plain summary.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use a2a_core::dispatcher::{self, CreateTaskRequest, Identity, NextTask};
use a2a_core::metrics::Metrics;
use a2a_core::routing::{self, TaskAttrs};
use a2a_db::models::{Task, TaskStatus};
use a2a_db::queries::tasks as task_db;

/// Arguments for `a2ahub task create`.
#[allow(clippy::too_many_arguments)]
pub struct CreateArgs {
    pub task_code: String,
    pub area: String,
    pub owner_role: String,
    pub instructions: String,
    pub how_to_repro: String,
    pub expected: String,
    pub evidence_requirements: String,
    pub message_id: Option<String>,
    pub priority: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub retry_backoff_sec: Option<i32>,
    pub dependencies: Vec<String>,
}

pub async fn run_create(pool: &PgPool, args: CreateArgs) -> Result<()> {
    let dependencies = args
        .dependencies
        .iter()
        .map(|s| Uuid::parse_str(s).with_context(|| format!("invalid dependency task_id: {s}")))
        .collect::<Result<Vec<_>>>()?;

    let metrics = Metrics::new();
    let task = dispatcher::create(
        pool,
        &metrics,
        CreateTaskRequest {
            task_code: args.task_code,
            area: args.area,
            owner_role: args.owner_role,
            instructions: args.instructions,
            how_to_repro: args.how_to_repro,
            expected: args.expected,
            evidence_requirements: args.evidence_requirements,
            message_id: args.message_id,
            priority: args.priority,
            deadline: None,
            timeout_seconds: args.timeout_seconds,
            max_retries: args.max_retries,
            retry_backoff_sec: args.retry_backoff_sec,
            dependencies,
        },
    )
    .await?;

    print_task(&task);
    Ok(())
}

/// Exactly one of `task_id`, `task_code`, `message_id` must be `Some`.
pub async fn run_status(
    pool: &PgPool,
    task_id: Option<&str>,
    task_code: Option<&str>,
    message_id: Option<&str>,
) -> Result<()> {
    let task = match (task_id, task_code, message_id) {
        (Some(id), None, None) => {
            let id = Uuid::parse_str(id).with_context(|| format!("invalid task ID: {id}"))?;
            task_db::get_task(pool, id).await?
        }
        (None, Some(code), None) => task_db::get_task_by_code_most_recent(pool, code).await?,
        (None, None, Some(mid)) => task_db::get_task_by_message_id(pool, mid).await?,
        _ => anyhow::bail!("exactly one of --task-id, --task-code, --message-id is required"),
    };
    let task = task.context("task not found")?;
    print_task(&task);
    Ok(())
}

pub async fn run_next(pool: &PgPool, agent_id: &str) -> Result<()> {
    let metrics = Metrics::new();
    match dispatcher::next(pool, &metrics, agent_id).await? {
        NextTask::Task(task) => print_task(&task),
        NextTask::None => println!("no eligible task available for agent {agent_id}"),
    }
    Ok(())
}

pub async fn run_heartbeat(pool: &PgPool, task_id: &str) -> Result<()> {
    let id = Uuid::parse_str(task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
    let expiry = dispatcher::heartbeat(pool, id).await?;
    println!("task {id}: lease extended to {expiry}");
    Ok(())
}

/// Arguments for `a2ahub task result`.
pub struct ResultArgs {
    pub task_id: Option<String>,
    pub task_code: Option<String>,
    pub message_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub result: Option<serde_json::Value>,
    pub reason_code: Option<String>,
    pub last_error: Option<String>,
}

pub async fn run_result(pool: &PgPool, secret_key: &[u8], args: ResultArgs) -> Result<()> {
    let id_holder;
    let identity = match (
        args.task_id.as_deref(),
        args.task_code.as_deref(),
        args.message_id.as_deref(),
    ) {
        (Some(id), None, None) => {
            id_holder = Uuid::parse_str(id).with_context(|| format!("invalid task ID: {id}"))?;
            Identity::TaskId(id_holder)
        }
        (None, Some(code), None) => Identity::TaskCode(code),
        (None, None, Some(mid)) => Identity::MessageId(mid),
        _ => anyhow::bail!("exactly one of --task-id, --task-code, --message-id is required"),
    };

    let metrics = Metrics::new();
    let task = dispatcher::result(
        pool,
        &metrics,
        secret_key,
        identity,
        args.status,
        args.result,
        args.reason_code.as_deref(),
        args.last_error.as_deref(),
    )
    .await?;

    print_task(&task);
    Ok(())
}

pub async fn run_routing_decide(
    pool: &PgPool,
    task_code: &str,
    area: &str,
    owner_role: &str,
    priority: i32,
) -> Result<()> {
    let decision = routing::decide(
        pool,
        &TaskAttrs {
            task_code: task_code.to_string(),
            area: area.to_string(),
            owner_role: owner_role.to_string(),
            priority,
        },
    )
    .await?;

    println!("worker_type: {}", decision.worker_type);
    println!("decision:    {}", decision.decision);
    println!("trace_id:    {}", decision.trace_id);
    Ok(())
}

fn print_task(task: &Task) {
    println!("task_id:       {}", task.task_id);
    println!("task_code:     {}", task.task_code);
    println!("message_id:    {}", task.message_id.as_deref().unwrap_or("-"));
    println!("status:        {}", task.status);
    println!("owner_role:    {}", task.owner_role);
    println!("area:          {}", task.area);
    println!("priority:      {}", task.priority);
    println!("agent_id:      {}", task.agent_id.as_deref().unwrap_or("-"));
    println!("worker_type:   {}", task.worker_type.as_deref().unwrap_or("-"));
    println!("retry_count:   {}/{}", task.retry_count, task.max_retries);
    if let Some(expiry) = task.lease_expiry_ts {
        println!("lease_expiry:  {expiry}");
    }
    if let Some(reason) = &task.reason_code {
        println!("reason_code:   {reason}");
    }
    if let Some(err) = &task.last_error {
        println!("last_error:    {err}");
    }
}
