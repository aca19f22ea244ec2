//! Lease Sweeper (§4.7): a background loop that reclaims RUNNING tasks
//! whose worker went quiet past `lease_expiry_ts`.
//!
//! A `CancellationToken` raced against the loop's own timer via
//! `tokio::select!`, a fixed-interval poll with no DAG or semaphore
//! bookkeeping to carry between iterations.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use a2a_db::queries::tasks as task_db;

use crate::metrics::Metrics;
use crate::registry;

/// Cadence named in §4.7.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Run one sweep pass: reclaim every RUNNING task whose lease has expired,
/// restoring the assigned agent's capacity and bumping `queue_depth`.
///
/// Idempotent -- a task already moved off RUNNING by a concurrent caller
/// (result submission, another sweep) simply does not match the
/// `WHERE status = 'RUNNING'` predicate and is left untouched.
pub async fn sweep_once(pool: &PgPool, metrics: &Metrics) -> anyhow::Result<usize> {
    let reclaimed = task_db::sweep_expired_leases(pool).await?;
    for task in &reclaimed {
        if let Some(agent_id) = &task.agent_id {
            registry::release_capacity(pool, agent_id).await?;
        }
        metrics.queue_depth_inc();
        tracing::info!(
            task_id = %task.task_id,
            task_code = %task.task_code,
            agent_id = task.agent_id.as_deref().unwrap_or("none"),
            "LEASE_EXPIRED_REQUEUED"
        );
    }
    Ok(reclaimed.len())
}

/// Run the Lease Sweeper until `cancel` fires.
///
/// Holds no lock shared with request handlers: each pass is its own set of
/// short, independently-committed queries.
pub async fn run(pool: PgPool, metrics: std::sync::Arc<Metrics>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("lease sweeper shutting down");
                return;
            }
            _ = interval.tick() => {
                match sweep_once(&pool, &metrics).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(reclaimed = n, "lease sweep reclaimed tasks"),
                    Err(err) => tracing::error!(error = %err, "lease sweep failed"),
                }
            }
        }
    }
}
