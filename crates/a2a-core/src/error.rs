//! The error taxonomy from spec.md §7: one variant per `reason_code`, plus
//! the plumbing the HTTP layer needs to map each variant to a status code.

use uuid::Uuid;

/// An error surfaced by a Dispatcher, DLQ, or Registry operation.
///
/// Each variant corresponds to a `reason_code` string callers can match on
/// without parsing a message, and carries enough context to format a
/// useful operator-facing message.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid task template: {0}")]
    InvalidTaskTemplate(String),

    #[error("invalid state transition: {from} -> {to} for task {task_id}")]
    InvalidStatusTransition {
        task_id: Uuid,
        from: String,
        to: String,
    },

    #[error("no eligible agent available for this task")]
    AgentQuotaExceeded,

    #[error("artifact signature missing required field: {0}")]
    ArtifactSignatureMissing(String),

    #[error("unsupported signing algorithm: {0}")]
    ArtifactSignatureAlgorithmInvalid(String),

    #[error("artifact signature expired")]
    ArtifactSignatureExpired,

    #[error("artifact signature invalid")]
    ArtifactSignatureInvalid,

    #[error("missing required canonical pack field: {0}")]
    MissingRequiredField(String),

    #[error("canonical pack fields not in required order")]
    InvalidFieldOrder,

    #[error("canonical pack field has invalid format: {0}")]
    InvalidFieldFormat(String),

    #[error("canonical pack status is not one of PASS/FAIL/ERROR: {0}")]
    InvalidStatus(String),

    #[error("canonical pack trace_id is not a valid UUIDv4: {0}")]
    InvalidUuid(String),

    #[error("invalid SHA-256 hash: {0}")]
    InvalidSha256(String),

    #[error("task not found")]
    TaskNotFound,

    #[error("agent not found")]
    AgentNotFound,

    #[error("dlq entry not found")]
    DlqEntryNotFound,

    #[error("task already DONE; replay forbidden")]
    ReplayForbidden,

    #[error("conflict, retry the idempotency lookup: {0}")]
    Conflict(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    /// The stable `reason_code` string returned to callers in both the
    /// HTTP response body and CLI output.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidTaskTemplate(_) => "invalid_task_template",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::AgentQuotaExceeded => "AGENT_QUOTA_EXCEEDED",
            Self::ArtifactSignatureMissing(_) => "ARTIFACT_SIGNATURE_MISSING",
            Self::ArtifactSignatureAlgorithmInvalid(_) => "ARTIFACT_SIGNATURE_ALGORITHM_INVALID",
            Self::ArtifactSignatureExpired => "ARTIFACT_SIGNATURE_EXPIRED",
            Self::ArtifactSignatureInvalid => "ARTIFACT_SIGNATURE_INVALID",
            Self::MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            Self::InvalidFieldOrder => "INVALID_FIELD_ORDER",
            Self::InvalidFieldFormat(_) => "INVALID_FIELD_FORMAT",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::InvalidUuid(_) => "INVALID_UUID",
            Self::InvalidSha256(_) => "INVALID_SHA256",
            Self::TaskNotFound => "not_found",
            Self::AgentNotFound => "not_found",
            Self::DlqEntryNotFound => "not_found",
            Self::ReplayForbidden => "replay_forbidden",
            Self::Conflict(_) => "conflict",
            Self::Other(_) => "internal_error",
        }
    }
}
