//! Workflow Recovery (§4.9): a `check`/`repair` pass over the full task
//! graph that catches inconsistencies background loops and request-path
//! logic cannot, because they only ever see one task at a time.
//!
//! Runs a startup-style orphan-reset pass against the whole table rather
//! than one subset at a time, walking a fixed four-case check list.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use a2a_db::models::{Task, TaskStatus};
use a2a_db::queries::tasks as task_db;
use a2a_db::queries::workflow as workflow_db;

/// One cross-task inconsistency surfaced by [`check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// `status=RUNNING` but `lease_expiry_ts` is null or already past.
    RunningTaskMissingValidLease { task_id: Uuid },
    /// A dependency id resolves to no row in `tasks`.
    MissingDependencyTask {
        task_id: Uuid,
        dependency_id: Uuid,
    },
    /// Task is RUNNING or DONE but some dependency has not reached DONE.
    TaskCompletedBeforeDependency {
        task_id: Uuid,
        dependency_id: Uuid,
    },
    /// A dependency is FAIL but the dependent is not itself FAIL/DLQ.
    DependencyFailedButTaskActive {
        task_id: Uuid,
        dependency_id: Uuid,
    },
}

impl Inconsistency {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RunningTaskMissingValidLease { .. } => "RUNNING_TASK_MISSING_VALID_LEASE",
            Self::MissingDependencyTask { .. } => "MISSING_DEPENDENCY_TASK",
            Self::TaskCompletedBeforeDependency { .. } => "TASK_COMPLETED_BEFORE_DEPENDENCY",
            Self::DependencyFailedButTaskActive { .. } => "DEPENDENCY_FAILED_BUT_TASK_ACTIVE",
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            Self::RunningTaskMissingValidLease { task_id }
            | Self::MissingDependencyTask { task_id, .. }
            | Self::TaskCompletedBeforeDependency { task_id, .. }
            | Self::DependencyFailedButTaskActive { task_id, .. } => *task_id,
        }
    }
}

/// Outcome of a full [`run`] (check, repair, re-check, stamp).
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Inconsistencies found on the first pass, before any repair.
    pub found: Vec<Inconsistency>,
    /// Inconsistencies still present after repair (non-empty means the
    /// workflow is stamped `recovery_status=FAILED`).
    pub remaining: Vec<Inconsistency>,
    pub healthy: bool,
}

/// `check` phase (§4.9): walk every task and report every inconsistency.
///
/// Loads the whole table once so dependency lookups are in-memory; a
/// production-scale store would paginate this, but the Store has no
/// secondary index that makes a streaming version simpler.
pub async fn check(pool: &PgPool) -> anyhow::Result<Vec<Inconsistency>> {
    let tasks = task_db::list_all(pool).await?;
    Ok(evaluate(&tasks))
}

/// Pure evaluation of the four §4.9 invariants against an in-memory task
/// set. Split out from [`check`] so the invariant logic is testable
/// without a database.
pub fn evaluate(tasks: &[Task]) -> Vec<Inconsistency> {
    let by_id: HashMap<Uuid, &Task> = tasks.iter().map(|t| (t.task_id, t)).collect();
    let mut found = Vec::new();

    for task in tasks {
        if task.status == TaskStatus::Running {
            let lease_invalid = match task.lease_expiry_ts {
                None => true,
                Some(expiry) => expiry <= chrono::Utc::now(),
            };
            if lease_invalid {
                found.push(Inconsistency::RunningTaskMissingValidLease {
                    task_id: task.task_id,
                });
            }
        }

        for dep_id in task.dependency_ids() {
            match by_id.get(&dep_id) {
                None => found.push(Inconsistency::MissingDependencyTask {
                    task_id: task.task_id,
                    dependency_id: dep_id,
                }),
                Some(dep) => {
                    if matches!(task.status, TaskStatus::Running | TaskStatus::Done)
                        && dep.status != TaskStatus::Done
                    {
                        found.push(Inconsistency::TaskCompletedBeforeDependency {
                            task_id: task.task_id,
                            dependency_id: dep_id,
                        });
                    }
                    if dep.status == TaskStatus::Fail
                        && !matches!(task.status, TaskStatus::Fail | TaskStatus::Dlq)
                    {
                        found.push(Inconsistency::DependencyFailedButTaskActive {
                            task_id: task.task_id,
                            dependency_id: dep_id,
                        });
                    }
                }
            }
        }
    }

    found
}

/// `repair` phase (§4.9): fix the two mechanically-repairable cases.
///
/// `MISSING_DEPENDENCY_TASK` and `TASK_COMPLETED_BEFORE_DEPENDENCY` are
/// data problems with no safe automatic fix (the referenced task may
/// simply not have been created yet); they are reported but left alone.
pub async fn repair(pool: &PgPool, found: &[Inconsistency]) -> anyhow::Result<()> {
    for item in found {
        match item {
            Inconsistency::RunningTaskMissingValidLease { task_id } => {
                task_db::force_requeue(pool, *task_id).await?;
                tracing::warn!(task_id = %task_id, "recovery: force-requeued orphaned RUNNING task");
            }
            Inconsistency::DependencyFailedButTaskActive { task_id, .. } => {
                task_db::force_fail(pool, *task_id, "DEPENDENCY_FAILED").await?;
                tracing::warn!(task_id = %task_id, "recovery: force-failed task with failed dependency");
            }
            Inconsistency::MissingDependencyTask { .. }
            | Inconsistency::TaskCompletedBeforeDependency { .. } => {}
        }
    }
    Ok(())
}

/// Run a full recovery pass: check, repair, re-check, and stamp the
/// singleton `workflows` row. Runs on startup and on demand (`POST
/// /workflow/recover`).
pub async fn run(pool: &PgPool) -> anyhow::Result<RecoveryReport> {
    let found = check(pool).await?;
    if !found.is_empty() {
        repair(pool, &found).await?;
    }
    let remaining = check(pool).await?;
    let healthy = remaining.is_empty();

    let (status, recovery_status) = if healthy {
        ("HEALTHY", "SUCCESS")
    } else {
        ("DEGRADED", "FAILED")
    };
    workflow_db::record_recovery(pool, status, recovery_status).await?;

    if !healthy {
        tracing::error!(
            remaining = remaining.len(),
            "workflow recovery completed with unresolved inconsistencies"
        );
    }

    Ok(RecoveryReport {
        found,
        remaining,
        healthy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn base_task(status: TaskStatus) -> Task {
        Task {
            task_id: Uuid::new_v4(),
            task_code: "T1".into(),
            message_id: None,
            instructions: "x".into(),
            how_to_repro: "x".into(),
            expected: "x".into(),
            evidence_requirements: "x".into(),
            owner_role: "SRE Engineer".into(),
            area: "ci/exchange".into(),
            priority: 0,
            status,
            deadline: None,
            timeout_seconds: 600,
            max_retries: 3,
            retry_backoff_sec: 30,
            retry_count: 0,
            next_retry_ts: None,
            lease_seconds: 60,
            lease_expiry_ts: None,
            agent_id: None,
            worker_type: None,
            routing_decision: None,
            trace_id: None,
            dependencies: json!([]),
            reason_code: None,
            last_error: None,
            result: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn running_without_lease_is_flagged() {
        let task = base_task(TaskStatus::Running);
        let found = evaluate(&[task.clone()]);
        assert_eq!(
            found,
            vec![Inconsistency::RunningTaskMissingValidLease { task_id: task.task_id }]
        );
    }

    #[test]
    fn running_with_live_lease_is_clean() {
        let mut task = base_task(TaskStatus::Running);
        task.lease_expiry_ts = Some(Utc::now() + chrono::Duration::seconds(30));
        assert!(evaluate(&[task]).is_empty());
    }

    #[test]
    fn missing_dependency_is_flagged() {
        let dep_id = Uuid::new_v4();
        let mut task = base_task(TaskStatus::Pending);
        task.dependencies = json!([dep_id.to_string()]);
        let found = evaluate(&[task.clone()]);
        assert_eq!(
            found,
            vec![Inconsistency::MissingDependencyTask {
                task_id: task.task_id,
                dependency_id: dep_id
            }]
        );
    }

    #[test]
    fn dependency_failed_but_task_active_is_flagged_and_repaired() {
        let dep = base_task(TaskStatus::Fail);
        let mut task = base_task(TaskStatus::Pending);
        task.dependencies = json!([dep.task_id.to_string()]);

        let found = evaluate(&[dep.clone(), task.clone()]);
        assert_eq!(
            found,
            vec![Inconsistency::DependencyFailedButTaskActive {
                task_id: task.task_id,
                dependency_id: dep.task_id
            }]
        );
    }

    #[test]
    fn done_task_with_incomplete_dependency_is_flagged() {
        let dep = base_task(TaskStatus::Pending);
        let mut task = base_task(TaskStatus::Done);
        task.dependencies = json!([dep.task_id.to_string()]);

        let found = evaluate(&[dep.clone(), task.clone()]);
        assert_eq!(
            found,
            vec![Inconsistency::TaskCompletedBeforeDependency {
                task_id: task.task_id,
                dependency_id: dep.task_id
            }]
        );
    }

    #[test]
    fn healthy_graph_is_clean() {
        let dep = base_task(TaskStatus::Done);
        let mut task = base_task(TaskStatus::Done);
        task.dependencies = json!([dep.task_id.to_string()]);
        assert!(evaluate(&[dep, task]).is_empty());
    }
}
