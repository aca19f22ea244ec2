use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task in the dispatch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Fail,
    Dlq,
    Blocked,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Fail => "FAIL",
            Self::Dlq => "DLQ",
            Self::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            "FAIL" => Ok(Self::Fail),
            "DLQ" => Ok(Self::Dlq),
            "BLOCKED" => Ok(Self::Blocked),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of dispatchable work.
///
/// `task_id` is the opaque system identity; `task_code` is a free-form
/// display label with no uniqueness guarantee. `message_id` is the
/// caller-chosen idempotency key, unique among non-null values.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub task_id: Uuid,
    pub task_code: String,
    pub message_id: Option<String>,
    pub instructions: String,
    pub how_to_repro: String,
    pub expected: String,
    pub evidence_requirements: String,
    pub owner_role: String,
    pub area: String,
    pub priority: i32,
    pub status: TaskStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub retry_backoff_sec: i32,
    pub retry_count: i32,
    pub next_retry_ts: Option<DateTime<Utc>>,
    pub lease_seconds: i32,
    pub lease_expiry_ts: Option<DateTime<Utc>>,
    pub agent_id: Option<String>,
    pub worker_type: Option<String>,
    pub routing_decision: Option<String>,
    pub trace_id: Option<Uuid>,
    /// Ordered list of task_ids this task depends on, stored as jsonb.
    pub dependencies: serde_json::Value,
    pub reason_code: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Parse the `dependencies` jsonb column into a vec of task ids.
    ///
    /// Malformed or absent dependency data is treated as "no dependencies"
    /// rather than an error -- the column is always written by this crate
    /// as a JSON array of strings, so a parse failure here indicates data
    /// from an external writer, which the dispatcher should not trust.
    pub fn dependency_ids(&self) -> Vec<Uuid> {
        self.dependencies
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A registered worker agent.
///
/// `agent_id` is caller-chosen (not server-generated), matching the
/// registration contract where operators name their own workers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub agent_id: String,
    pub owner_role: String,
    /// jsonb array of capability strings.
    pub capabilities: serde_json::Value,
    /// jsonb array of allowed tool strings.
    pub allowed_tools: serde_json::Value,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub capacity: i32,
    pub available_capacity: i32,
    pub completion_limit_per_minute: i32,
    pub current_completion_count: i32,
    pub completion_window_start: DateTime<Utc>,
    pub worker_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn capability_list(&self) -> Vec<String> {
        self.capabilities
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default()
    }
}

/// An immutable snapshot of a task that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DlqEntry {
    pub dlq_id: Uuid,
    pub task_id: Uuid,
    pub task_code: String,
    pub message_id: Option<String>,
    /// Full task payload at the moment of promotion.
    pub snapshot: serde_json::Value,
    pub reason_code: Option<String>,
    pub last_error: Option<String>,
    pub trace_id: Option<Uuid>,
    pub replay_who: Option<String>,
    pub replay_when: Option<DateTime<Utc>>,
    pub replay_why: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A routing rule evaluated by the Routing Engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoutingRule {
    pub rule_id: String,
    pub condition: String,
    pub target_worker: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of a routing decision.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoutingAudit {
    pub id: i64,
    pub trace_id: Uuid,
    pub routing_decision: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Singleton row tracking the most recent workflow-consistency recovery run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workflow {
    pub name: String,
    pub status: String,
    pub last_recovery_time: Option<DateTime<Utc>>,
    pub recovery_status: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
