//! Database query functions for the `agents` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Agent;

/// Register a new agent, or update an existing one's capabilities/capacity
/// if it re-registers. `available_capacity` is only initialized on first
/// registration -- re-registering does not reset in-flight lease accounting.
pub async fn register(
    pool: &PgPool,
    agent_id: &str,
    owner_role: &str,
    capabilities: &serde_json::Value,
    allowed_tools: &serde_json::Value,
    capacity: i32,
    completion_limit_per_minute: i32,
    worker_type: Option<&str>,
) -> Result<Agent> {
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents ( \
            agent_id, owner_role, capabilities, allowed_tools, online, last_seen, \
            capacity, available_capacity, completion_limit_per_minute, \
            current_completion_count, completion_window_start, worker_type \
         ) VALUES ($1, $2, $3, $4, TRUE, NOW(), $5, $5, $6, 0, NOW(), $7) \
         ON CONFLICT (agent_id) DO UPDATE SET \
            owner_role = EXCLUDED.owner_role, \
            capabilities = EXCLUDED.capabilities, \
            allowed_tools = EXCLUDED.allowed_tools, \
            online = TRUE, \
            last_seen = NOW(), \
            capacity = EXCLUDED.capacity, \
            completion_limit_per_minute = EXCLUDED.completion_limit_per_minute, \
            worker_type = EXCLUDED.worker_type, \
            updated_at = NOW() \
         RETURNING *",
    )
    .bind(agent_id)
    .bind(owner_role)
    .bind(capabilities)
    .bind(allowed_tools)
    .bind(capacity)
    .bind(completion_limit_per_minute)
    .bind(worker_type)
    .fetch_one(pool)
    .await
    .context("failed to register agent")?;
    Ok(agent)
}

pub async fn get(pool: &PgPool, agent_id: &str) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE agent_id = $1")
        .bind(agent_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch agent")?;
    Ok(agent)
}

pub async fn list(pool: &PgPool) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY agent_id ASC")
        .fetch_all(pool)
        .await
        .context("failed to list agents")?;
    Ok(agents)
}

/// Operator-driven update of an agent's capacity or online status.
pub async fn update(
    pool: &PgPool,
    agent_id: &str,
    capacity: Option<i32>,
    completion_limit_per_minute: Option<i32>,
    online: Option<bool>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE agents SET \
            capacity = COALESCE($1, capacity), \
            completion_limit_per_minute = COALESCE($2, completion_limit_per_minute), \
            online = COALESCE($3, online), \
            updated_at = NOW() \
         WHERE agent_id = $4",
    )
    .bind(capacity)
    .bind(completion_limit_per_minute)
    .bind(online)
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to update agent")?;
    Ok(result.rows_affected())
}

/// Deregister an agent. Tasks currently leased to it are left untouched;
/// the Lease Sweeper reclaims them once the lease expires.
pub async fn deregister(pool: &PgPool, agent_id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE agents SET online = FALSE, updated_at = NOW() WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to deregister agent")?;
    Ok(result.rows_affected())
}

/// Decrement `available_capacity` by one when a task is dispatched to this
/// agent. Guarded so capacity never goes negative under a race.
pub async fn take_capacity(pool: &PgPool, agent_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE agents SET available_capacity = available_capacity - 1, updated_at = NOW() \
         WHERE agent_id = $1 AND available_capacity > 0",
    )
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to take agent capacity")?;
    Ok(result.rows_affected())
}

/// Return one unit of capacity when a leased task reaches a terminal state
/// (DONE, FAIL, DLQ) or is requeued (lease expiry, explicit retry).
pub async fn release_capacity(pool: &PgPool, agent_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE agents SET \
            available_capacity = LEAST(available_capacity + 1, capacity), updated_at = NOW() \
         WHERE agent_id = $1",
    )
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to release agent capacity")?;
    Ok(result.rows_affected())
}

/// Roll the per-minute completion-rate window forward if it has expired,
/// resetting the counter to zero. Shared between eligibility filtering
/// (checking whether an agent is under its rate limit before dispatch) and
/// DONE-result processing (incrementing the counter after a completion).
pub async fn reset_completion_window_if_needed(pool: &PgPool, agent_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE agents SET current_completion_count = 0, completion_window_start = NOW() \
         WHERE agent_id = $1 AND completion_window_start <= NOW() - INTERVAL '1 minute'",
    )
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to reset agent completion window")?;
    Ok(())
}

/// Increment the completion counter within the current window. Called after
/// `reset_completion_window_if_needed` so the counter reflects the current
/// minute, not a stale one.
pub async fn record_completion(pool: &PgPool, agent_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE agents SET current_completion_count = current_completion_count + 1 WHERE agent_id = $1",
    )
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to record agent completion")?;
    Ok(result.rows_affected())
}

pub async fn touch_last_seen(pool: &PgPool, agent_id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE agents SET last_seen = NOW(), online = TRUE WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to touch agent last_seen")?;
    Ok(result.rows_affected())
}
