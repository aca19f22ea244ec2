//! Database query functions for the append-only `routing_audit` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::RoutingAudit;

/// Record a routing decision. Written once per `decide()` call regardless
/// of whether a rule matched or the task fell through to no assignment.
pub async fn append(
    pool: &PgPool,
    trace_id: Uuid,
    routing_decision: &str,
    input: &serde_json::Value,
    output: &serde_json::Value,
) -> Result<RoutingAudit> {
    let row = sqlx::query_as::<_, RoutingAudit>(
        "INSERT INTO routing_audit (trace_id, routing_decision, input, output) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(trace_id)
    .bind(routing_decision)
    .bind(input)
    .bind(output)
    .fetch_one(pool)
    .await
    .context("failed to append routing audit row")?;
    Ok(row)
}

pub async fn list_for_trace(pool: &PgPool, trace_id: Uuid) -> Result<Vec<RoutingAudit>> {
    let rows = sqlx::query_as::<_, RoutingAudit>(
        "SELECT * FROM routing_audit WHERE trace_id = $1 ORDER BY created_at ASC",
    )
    .bind(trace_id)
    .fetch_all(pool)
    .await
    .context("failed to list routing audit rows for trace")?;
    Ok(rows)
}
