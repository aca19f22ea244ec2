//! Database query functions for the `routing_rules` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::RoutingRule;

/// The six default routing rules seeded at `a2ahub init` time (§6).
/// `ON CONFLICT DO NOTHING` keeps `init` idempotent against re-runs.
pub async fn seed_defaults(pool: &PgPool) -> Result<()> {
    let defaults: &[(&str, &str, &str, i32)] = &[
        ("R1", "area = ci/exchange", "Trae", 100),
        ("R2", "owner_role = SRE Engineer", "Cursor", 90),
        ("R3", "priority >= 2", "Trae", 80),
        ("R4", "area = ci/controlplane", "Trae", 70),
        ("R5", "task_code starts with \"ATA-\"", "Trae", 60),
        ("R6", "default", "Other", 10),
    ];
    for (rule_id, condition, target_worker, priority) in defaults {
        sqlx::query(
            "INSERT INTO routing_rules (rule_id, condition, target_worker, priority) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (rule_id) DO NOTHING",
        )
        .bind(rule_id)
        .bind(condition)
        .bind(target_worker)
        .bind(priority)
        .execute(pool)
        .await
        .with_context(|| format!("failed to seed routing rule {rule_id}"))?;
    }
    Ok(())
}

/// List every routing rule, highest priority first -- the Routing Engine
/// evaluates them in this order and stops at the first match.
pub async fn list_by_priority(pool: &PgPool) -> Result<Vec<RoutingRule>> {
    let rules = sqlx::query_as::<_, RoutingRule>(
        "SELECT * FROM routing_rules ORDER BY priority DESC, rule_id ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list routing rules")?;
    Ok(rules)
}

pub async fn get(pool: &PgPool, rule_id: &str) -> Result<Option<RoutingRule>> {
    let rule = sqlx::query_as::<_, RoutingRule>("SELECT * FROM routing_rules WHERE rule_id = $1")
        .bind(rule_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch routing rule")?;
    Ok(rule)
}
