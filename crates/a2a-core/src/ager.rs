//! Priority Ager (§4.8): a background loop that promotes long-waiting
//! PENDING tasks so a flood of high-priority work cannot starve them
//! indefinitely.
//!
//! Same cooperative-shutdown shape as [`crate::sweeper`]: a
//! `CancellationToken` raced against a fixed-interval timer via
//! `tokio::select!`.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use a2a_db::queries::tasks as task_db;

/// Cadence named in §4.8.
pub const AGING_INTERVAL: Duration = Duration::from_secs(60);

/// Defaults named in §4.8: a task waits 300s before its first bump, then
/// gains 1 priority point per scan until it reaches `max_priority`.
pub const DEFAULT_AGING_THRESHOLD_SECS: i64 = 300;
pub const DEFAULT_AGING_STEP: i32 = 1;
pub const DEFAULT_MAX_PRIORITY: i32 = 3;

/// Run one aging pass, logging a structured line per bumped task.
pub async fn age_once(pool: &PgPool) -> anyhow::Result<usize> {
    let bumped = task_db::age_priorities(
        pool,
        DEFAULT_AGING_THRESHOLD_SECS,
        DEFAULT_AGING_STEP,
        DEFAULT_MAX_PRIORITY,
    )
    .await?;
    for task in &bumped {
        tracing::info!(
            task_id = %task.task_id,
            task_code = %task.task_code,
            new_priority = task.priority,
            "PRIORITY_AGED"
        );
    }
    Ok(bumped.len())
}

/// Run the Priority Ager until `cancel` fires.
pub async fn run(pool: PgPool, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(AGING_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("priority ager shutting down");
                return;
            }
            _ = interval.tick() => {
                match age_once(&pool).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(bumped = n, "priority ager bumped tasks"),
                    Err(err) => tracing::error!(error = %err, "priority aging pass failed"),
                }
            }
        }
    }
}
