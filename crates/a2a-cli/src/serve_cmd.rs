//! HTTP server for the A2A Task Hub (§6): one axum handler per endpoint
//! contract, an `AppError` → JSON error-body mapping, and the RBAC checks
//! from [`crate::rbac`] at the top of every handler.
//!
//! `build_router`/`run_serve` follow the familiar `AppError` + `with_state`
//! + graceful-shutdown-via-`ctrl_c` shape, with `CorsLayer::permissive` for
//! local tooling, plus the Sweeper/Ager background loops and a startup
//! Workflow Recovery pass spawned alongside the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use a2a_core::dispatcher::{self, CreateTaskRequest, Identity, NextTask};
use a2a_core::error::DispatchError;
use a2a_core::metrics::Metrics;
use a2a_core::routing::{self, TaskAttrs};
use a2a_core::{ager, dlq, recovery, registry, sweeper};
use a2a_db::models::{Agent, Task, TaskStatus};

use crate::rbac::{self, Permission};

// ---------------------------------------------------------------------------
// App state & error type
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub metrics: Arc<Metrics>,
    pub secret_key: Arc<Vec<u8>>,
}

pub struct AppError {
    status: StatusCode,
    message: String,
    reason_code: Option<String>,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
            reason_code: Some("not_found".into()),
        }
    }

    pub fn bad_request(msg: impl Into<String>, reason_code: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
            reason_code: Some(reason_code.to_string()),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: msg.into(),
            reason_code: Some("acl_denied".into()),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
            reason_code: Some("internal_error".into()),
        }
    }
}

impl From<rbac::RbacError> for AppError {
    fn from(err: rbac::RbacError) -> Self {
        match err {
            rbac::RbacError::MissingRole | rbac::RbacError::UnknownRole(_) => {
                AppError::bad_request(err.to_string(), "MISSING_REQUIRED_FIELD")
            }
            rbac::RbacError::Denied(_) => AppError::forbidden(err.to_string()),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let reason_code = err.reason_code().to_string();
        let status = match &err {
            DispatchError::InvalidTaskTemplate(_) | DispatchError::InvalidStatusTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::AgentQuotaExceeded => StatusCode::BAD_REQUEST,
            DispatchError::ArtifactSignatureMissing(_)
            | DispatchError::ArtifactSignatureAlgorithmInvalid(_)
            | DispatchError::ArtifactSignatureExpired
            | DispatchError::ArtifactSignatureInvalid
            | DispatchError::MissingRequiredField(_)
            | DispatchError::InvalidFieldOrder
            | DispatchError::InvalidFieldFormat(_)
            | DispatchError::InvalidStatus(_)
            | DispatchError::InvalidUuid(_)
            | DispatchError::InvalidSha256(_) => StatusCode::BAD_REQUEST,
            DispatchError::TaskNotFound | DispatchError::AgentNotFound | DispatchError::DlqEntryNotFound => {
                StatusCode::NOT_FOUND
            }
            DispatchError::ReplayForbidden => StatusCode::BAD_REQUEST,
            DispatchError::Conflict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
            reason_code: Some(reason_code),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut body = serde_json::json!({ "success": false, "error": self.message });
        if let Some(code) = &self.reason_code {
            body["reason_code"] = serde_json::Value::String(code.clone());
        }
        (self.status, Json(body)).into_response()
    }
}

fn require(headers: &HeaderMap, perm: Permission) -> Result<String, AppError> {
    Ok(rbac::require(headers, perm)?)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/task/create", post(task_create))
        .route("/task/status", get(task_status))
        .route("/task/next", get(task_next))
        .route("/task/heartbeat", post(task_heartbeat))
        .route("/task/result", post(task_result))
        .route("/task/routing", post(task_routing))
        .route("/dlq/list", get(dlq_list))
        .route("/dlq/{dlq_id}", get(dlq_get))
        .route("/dlq/task/{task_code}", get(dlq_get_by_task_code))
        .route("/dlq/message/{message_id}", get(dlq_get_by_message_id))
        .route("/dlq/replay", post(dlq_replay))
        .route("/agent/register", post(agent_register))
        .route("/agent/list", get(agent_list))
        .route(
            "/agent/{agent_id}",
            get(agent_get).put(agent_update).delete(agent_deregister),
        )
        .route("/workflow/recover", post(workflow_recover))
        .route("/workflow/status", get(workflow_status))
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the server: apply migrations are assumed already applied, run a
/// startup Workflow Recovery pass, spawn the Sweeper and Ager loops, then
/// serve until `Ctrl+C`.
pub async fn run_serve(pool: PgPool, secret_key: Vec<u8>, bind: &str, port: u16) -> Result<()> {
    let metrics = Arc::new(Metrics::new());

    let startup_report = recovery::run(&pool).await?;
    if !startup_report.healthy {
        tracing::warn!(
            remaining = startup_report.remaining.len(),
            "startup workflow recovery left unresolved inconsistencies"
        );
    }

    let cancel = CancellationToken::new();
    let sweeper_handle = tokio::spawn(sweeper::run(pool.clone(), metrics.clone(), cancel.child_token()));
    let ager_handle = tokio::spawn(ager::run(pool.clone(), cancel.child_token()));

    let state = AppState {
        pool,
        metrics,
        secret_key: Arc::new(secret_key),
    };
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("a2ahub serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = sweeper_handle.await;
    let _ = ager_handle.await;
    tracing::info!("a2ahub serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// task/*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    pub task_code: String,
    pub area: String,
    pub owner_role: String,
    pub instructions: String,
    pub how_to_repro: String,
    pub expected: String,
    pub evidence_requirements: String,
    pub message_id: Option<String>,
    pub priority: Option<i32>,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub retry_backoff_sec: Option<i32>,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct CreateTaskResponse {
    success: bool,
    task_id: Uuid,
    task_code: String,
    message_id: Option<String>,
    status: TaskStatus,
    agent_id: Option<String>,
    timeout_seconds: i32,
    max_retries: i32,
}

async fn task_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::Create)?;

    let task = dispatcher::create(
        &state.pool,
        &state.metrics,
        CreateTaskRequest {
            task_code: body.task_code,
            area: body.area,
            owner_role: body.owner_role,
            instructions: body.instructions,
            how_to_repro: body.how_to_repro,
            expected: body.expected,
            evidence_requirements: body.evidence_requirements,
            message_id: body.message_id,
            priority: body.priority,
            deadline: body.deadline,
            timeout_seconds: body.timeout_seconds,
            max_retries: body.max_retries,
            retry_backoff_sec: body.retry_backoff_sec,
            dependencies: body.dependencies,
        },
    )
    .await?;

    Ok(Json(CreateTaskResponse {
        success: true,
        task_id: task.task_id,
        task_code: task.task_code,
        message_id: task.message_id,
        status: task.status,
        agent_id: task.agent_id,
        timeout_seconds: task.timeout_seconds,
        max_retries: task.max_retries,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusQuery {
    pub task_code: Option<String>,
    pub task_id: Option<Uuid>,
    pub message_id: Option<String>,
}

fn resolve_selector<'a>(
    task_code: Option<&'a str>,
    task_id: Option<Uuid>,
    message_id: Option<&'a str>,
) -> Result<Identity<'a>, AppError> {
    let present = [task_code.is_some(), task_id.is_some(), message_id.is_some()]
        .iter()
        .filter(|b| **b)
        .count();
    if present != 1 {
        return Err(AppError::bad_request(
            "exactly one of task_code, task_id, message_id is required",
            "MISSING_REQUIRED_FIELD",
        ));
    }
    if let Some(id) = task_id {
        return Ok(Identity::TaskId(id));
    }
    if let Some(code) = task_code {
        return Ok(Identity::TaskCode(code));
    }
    if let Some(mid) = message_id {
        return Ok(Identity::MessageId(mid));
    }
    unreachable!()
}

#[derive(Debug, Serialize)]
struct TaskView {
    success: bool,
    #[serde(flatten)]
    task: Task,
}

async fn task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TaskStatusQuery>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;

    let identity = resolve_selector(q.task_code.as_deref(), q.task_id, q.message_id.as_deref())?;
    let task = match identity {
        Identity::TaskId(id) => a2a_db::queries::tasks::get_task(&state.pool, id).await?,
        Identity::MessageId(mid) => a2a_db::queries::tasks::get_task_by_message_id(&state.pool, mid).await?,
        Identity::TaskCode(code) => a2a_db::queries::tasks::get_task_by_code_most_recent(&state.pool, code).await?,
    }
    .ok_or_else(|| AppError::not_found("task not found"))?;

    Ok(Json(TaskView { success: true, task }).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TaskNextQuery {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
struct TaskNextResponse {
    success: bool,
    task: Option<Task>,
    message: Option<String>,
}

async fn task_next(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TaskNextQuery>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::Assign)?;

    match dispatcher::next(&state.pool, &state.metrics, &q.agent_id).await? {
        NextTask::Task(task) => Ok(Json(TaskNextResponse {
            success: true,
            task: Some(task),
            message: None,
        })
        .into_response()),
        NextTask::None => Ok(Json(TaskNextResponse {
            success: true,
            task: None,
            message: Some("no eligible task available".to_string()),
        })
        .into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    success: bool,
    new_lease_expiry: chrono::DateTime<chrono::Utc>,
    lease_seconds: i32,
}

async fn task_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::Assign)?;

    let new_lease_expiry = dispatcher::heartbeat(&state.pool, body.task_id).await?;
    let task = a2a_db::queries::tasks::get_task(&state.pool, body.task_id)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;

    Ok(Json(HeartbeatResponse {
        success: true,
        new_lease_expiry,
        lease_seconds: task.lease_seconds,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ResultBody {
    pub task_id: Option<Uuid>,
    pub message_id: Option<String>,
    pub task_code: Option<String>,
    pub status: Option<TaskStatus>,
    pub result: Option<serde_json::Value>,
    pub reason_code: Option<String>,
    pub last_error: Option<String>,
}

async fn task_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ResultBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReportResult)?;

    let identity = resolve_selector(
        body.task_code.as_deref(),
        body.task_id,
        body.message_id.as_deref(),
    )?;

    let task = dispatcher::result(
        &state.pool,
        &state.metrics,
        &state.secret_key,
        identity,
        body.status,
        body.result,
        body.reason_code.as_deref(),
        body.last_error.as_deref(),
    )
    .await?;

    Ok(Json(TaskView { success: true, task }).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RoutingBody {
    pub task_code: String,
    pub area: String,
    pub owner_role: String,
    pub priority: i32,
}

#[derive(Debug, Serialize)]
struct RoutingResponse {
    success: bool,
    worker_type: String,
    decision: String,
    trace_id: Uuid,
}

async fn task_routing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoutingBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;

    let decision = routing::decide(
        &state.pool,
        &TaskAttrs {
            task_code: body.task_code,
            area: body.area,
            owner_role: body.owner_role,
            priority: body.priority,
        },
    )
    .await?;

    Ok(Json(RoutingResponse {
        success: true,
        worker_type: decision.worker_type,
        decision: decision.decision,
        trace_id: decision.trace_id,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// dlq/*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DlqListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct DlqListResponse {
    success: bool,
    entries: Vec<a2a_db::models::DlqEntry>,
    page: i64,
    page_size: i64,
    total: i64,
}

async fn dlq_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<DlqListQuery>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;

    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * page_size;

    let entries = dlq::list(&state.pool, page_size, offset).await?;
    let total = dlq::count(&state.pool).await?;

    Ok(Json(DlqListResponse {
        success: true,
        entries,
        page,
        page_size,
        total,
    })
    .into_response())
}

async fn dlq_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(dlq_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;
    let entry = dlq::get(&state.pool, dlq_id)
        .await?
        .ok_or_else(|| AppError::not_found("dlq entry not found"))?;
    Ok(Json(serde_json::json!({ "success": true, "entry": entry })).into_response())
}

async fn dlq_get_by_task_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_code): Path<String>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;
    let entry = dlq::get_by_task_code(&state.pool, &task_code)
        .await?
        .ok_or_else(|| AppError::not_found("dlq entry not found"))?;
    Ok(Json(serde_json::json!({ "success": true, "entry": entry })).into_response())
}

async fn dlq_get_by_message_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;
    let entry = dlq::get_by_message_id(&state.pool, &message_id)
        .await?
        .ok_or_else(|| AppError::not_found("dlq entry not found"))?;
    Ok(Json(serde_json::json!({ "success": true, "entry": entry })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DlqReplayBody {
    pub dlq_id: Uuid,
    pub who: Option<String>,
    pub why: Option<String>,
}

async fn dlq_replay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DlqReplayBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReplayDlq)?;

    let who = body.who.unwrap_or_else(|| rbac::token_identity(&headers));
    let why = body.why.unwrap_or_else(|| "operator replay".to_string());

    let task = dlq::replay(&state.pool, body.dlq_id, &who, &why).await?;
    Ok(Json(TaskView { success: true, task }).into_response())
}

// ---------------------------------------------------------------------------
// agent/*
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AgentRegisterBody {
    pub agent_id: String,
    pub owner_role: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    pub capacity: i32,
    pub completion_limit_per_minute: i32,
    pub worker_type: Option<String>,
}

async fn agent_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AgentRegisterBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::Assign)?;

    let agent = registry::register(
        &state.pool,
        &body.agent_id,
        &body.owner_role,
        body.capabilities,
        body.allowed_tools,
        body.capacity,
        body.completion_limit_per_minute,
        body.worker_type.as_deref(),
    )
    .await?;

    Ok(Json(serde_json::json!({ "success": true, "agent": agent })).into_response())
}

async fn agent_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;
    let agents: Vec<Agent> = registry::list(&state.pool).await?;
    Ok(Json(serde_json::json!({ "success": true, "agents": agents })).into_response())
}

async fn agent_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;
    let agent = registry::get(&state.pool, &agent_id)
        .await?
        .ok_or_else(|| AppError::not_found("agent not found"))?;
    Ok(Json(serde_json::json!({ "success": true, "agent": agent })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AgentUpdateBody {
    pub capacity: Option<i32>,
    pub completion_limit_per_minute: Option<i32>,
    pub online: Option<bool>,
}

async fn agent_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<AgentUpdateBody>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::Assign)?;

    let updated = registry::update(
        &state.pool,
        &agent_id,
        body.capacity,
        body.completion_limit_per_minute,
        body.online,
    )
    .await?;
    if !updated {
        return Err(AppError::not_found("agent not found"));
    }
    let agent = registry::get(&state.pool, &agent_id)
        .await?
        .ok_or_else(|| AppError::not_found("agent not found"))?;
    Ok(Json(serde_json::json!({ "success": true, "agent": agent })).into_response())
}

async fn agent_deregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::Assign)?;

    let removed = registry::deregister(&state.pool, &agent_id).await?;
    if !removed {
        return Err(AppError::not_found("agent not found"));
    }
    Ok(Json(serde_json::json!({ "success": true })).into_response())
}

// ---------------------------------------------------------------------------
// workflow/*
// ---------------------------------------------------------------------------

async fn workflow_recover(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReplayDlq)?;

    let report = recovery::run(&state.pool).await?;
    let found: Vec<&'static str> = report.found.iter().map(|i| i.code()).collect();
    let remaining: Vec<&'static str> = report.remaining.iter().map(|i| i.code()).collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "healthy": report.healthy,
        "found": found,
        "remaining": remaining,
    }))
    .into_response())
}

async fn workflow_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    require(&headers, Permission::ReadAll)?;
    let workflow = a2a_db::queries::workflow::get_or_init(&state.pool).await?;
    Ok(Json(serde_json::json!({ "success": true, "workflow": workflow })).into_response())
}

// ---------------------------------------------------------------------------
// health / version
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> axum::response::Response {
    let snapshot = state.metrics.snapshot();
    Json(serde_json::json!({ "success": true, "status": "ok", "metrics": snapshot })).into_response()
}

async fn version() -> axum::response::Response {
    Json(serde_json::json!({ "success": true, "version": env!("CARGO_PKG_VERSION") })).into_response()
}
