//! Database query functions for the singleton `workflows` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Workflow;

const DEFAULT_NAME: &str = "default";

/// Ensure the singleton `"default"` workflow row exists, returning it.
pub async fn get_or_init(pool: &PgPool) -> Result<Workflow> {
    if let Some(row) = get(pool).await? {
        return Ok(row);
    }
    let row = sqlx::query_as::<_, Workflow>(
        "INSERT INTO workflows (name, status, last_recovery_time, recovery_status) \
         VALUES ($1, 'HEALTHY', NULL, NULL) \
         ON CONFLICT (name) DO NOTHING \
         RETURNING *",
    )
    .bind(DEFAULT_NAME)
    .fetch_optional(pool)
    .await
    .context("failed to initialize workflow row")?;

    match row {
        Some(row) => Ok(row),
        None => get(pool)
            .await?
            .context("workflow row missing after insert conflict"),
    }
}

pub async fn get(pool: &PgPool) -> Result<Option<Workflow>> {
    let row = sqlx::query_as::<_, Workflow>("SELECT * FROM workflows WHERE name = $1")
        .bind(DEFAULT_NAME)
        .fetch_optional(pool)
        .await
        .context("failed to fetch workflow row")?;
    Ok(row)
}

/// Stamp the outcome of a Workflow Recovery run.
pub async fn record_recovery(pool: &PgPool, status: &str, recovery_status: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflows SET status = $1, last_recovery_time = NOW(), recovery_status = $2 WHERE name = $3",
    )
    .bind(status)
    .bind(recovery_status)
    .bind(DEFAULT_NAME)
    .execute(pool)
    .await
    .context("failed to record workflow recovery")?;
    Ok(result.rows_affected())
}
