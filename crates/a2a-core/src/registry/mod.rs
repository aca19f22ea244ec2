//! Agent Registry: lifecycle of worker agents (register/deregister),
//! capacity accounting, and per-minute completion-rate windows.
//!
//! `select_eligible_agent` reads as a verdict-branching filter chain --
//! online, capacity, owner_role, worker_type, rate limit, capability --
//! falling through to the next candidate on any miss (§4.5 step 4).

use anyhow::{Context, Result};
use sqlx::PgPool;

use a2a_db::models::Agent;
use a2a_db::queries::agents as db;

/// Register (or re-register) an agent.
#[allow(clippy::too_many_arguments)]
pub async fn register(
    pool: &PgPool,
    agent_id: &str,
    owner_role: &str,
    capabilities: Vec<String>,
    allowed_tools: Vec<String>,
    capacity: i32,
    completion_limit_per_minute: i32,
    worker_type: Option<&str>,
) -> Result<Agent> {
    let capabilities = serde_json::to_value(capabilities)?;
    let allowed_tools = serde_json::to_value(allowed_tools)?;
    db::register(
        pool,
        agent_id,
        owner_role,
        &capabilities,
        &allowed_tools,
        capacity,
        completion_limit_per_minute,
        worker_type,
    )
    .await
}

pub async fn get(pool: &PgPool, agent_id: &str) -> Result<Option<Agent>> {
    db::get(pool, agent_id).await
}

pub async fn list(pool: &PgPool) -> Result<Vec<Agent>> {
    db::list(pool).await
}

pub async fn deregister(pool: &PgPool, agent_id: &str) -> Result<bool> {
    Ok(db::deregister(pool, agent_id).await? > 0)
}

pub async fn update(
    pool: &PgPool,
    agent_id: &str,
    capacity: Option<i32>,
    completion_limit_per_minute: Option<i32>,
    online: Option<bool>,
) -> Result<bool> {
    Ok(db::update(pool, agent_id, capacity, completion_limit_per_minute, online).await? > 0)
}

/// Roll an agent's one-minute completion-rate window forward if it has
/// expired. Shared between eligibility filtering (§4.5 step 4c) and
/// DONE-result processing (§4.5 step 5) rather than inlined at both call
/// sites.
pub async fn reset_completion_window_if_needed(pool: &PgPool, agent_id: &str) -> Result<()> {
    db::reset_completion_window_if_needed(pool, agent_id).await
}

/// Record a completion for rate-limiting purposes, resetting the window
/// first if it has rolled over.
pub async fn record_completion(pool: &PgPool, agent_id: &str) -> Result<()> {
    reset_completion_window_if_needed(pool, agent_id).await?;
    db::record_completion(pool, agent_id).await?;
    Ok(())
}

pub async fn take_capacity(pool: &PgPool, agent_id: &str) -> Result<bool> {
    Ok(db::take_capacity(pool, agent_id).await? > 0)
}

pub async fn release_capacity(pool: &PgPool, agent_id: &str) -> Result<()> {
    db::release_capacity(pool, agent_id).await?;
    Ok(())
}

/// Whether `agent`'s declared capabilities case-insensitively appear
/// inside `instructions`. An agent with no declared capabilities is
/// treated as matching (§4.5 step 4d's fallback).
pub fn capability_matches(agent: &Agent, instructions: &str) -> bool {
    let capabilities = agent.capability_list();
    if capabilities.is_empty() {
        return true;
    }
    let haystack = instructions.to_lowercase();
    capabilities
        .iter()
        .any(|cap| haystack.contains(&cap.to_lowercase()))
}

/// Select the first eligible agent for a task, applying §4.5 step 4's
/// filter chain in order: online + capacity + owner_role match, a
/// `worker_type` match when the routing decision is `"Cursor"` (other
/// worker types accept legacy agents with a NULL `worker_type`), an
/// under-the-rate-limit check (rolling the completion window forward
/// first), and finally the capability-substring heuristic.
pub async fn select_eligible_agent(
    pool: &PgPool,
    owner_role: &str,
    worker_type: &str,
    instructions: &str,
) -> Result<Option<Agent>> {
    let candidates = list_eligible_candidates(pool, owner_role).await?;

    for agent in candidates {
        if worker_type == "Cursor" && agent.worker_type.as_deref() != Some("Cursor") {
            continue;
        }

        reset_completion_window_if_needed(pool, &agent.agent_id).await?;
        let agent = db::get(pool, &agent.agent_id)
            .await?
            .context("agent disappeared during eligibility check")?;
        if agent.current_completion_count >= agent.completion_limit_per_minute {
            continue;
        }

        if !capability_matches(&agent, instructions) {
            continue;
        }

        return Ok(Some(agent));
    }

    Ok(None)
}

async fn list_eligible_candidates(pool: &PgPool, owner_role: &str) -> Result<Vec<Agent>> {
    let all = db::list(pool).await?;
    Ok(all
        .into_iter()
        .filter(|a| a.online && a.available_capacity > 0 && a.owner_role == owner_role)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn agent(capabilities: Vec<&str>) -> Agent {
        Agent {
            agent_id: "a1".into(),
            owner_role: "SRE Engineer".into(),
            capabilities: serde_json::json!(capabilities),
            allowed_tools: serde_json::json!([]),
            online: true,
            last_seen: Utc::now(),
            capacity: 1,
            available_capacity: 1,
            completion_limit_per_minute: 60,
            current_completion_count: 0,
            completion_window_start: Utc::now(),
            worker_type: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn no_declared_capabilities_matches_anything() {
        let a = agent(vec![]);
        assert!(capability_matches(&a, "do something"));
    }

    #[test]
    fn case_insensitive_substring_match() {
        let a = agent(vec!["Rust"]);
        assert!(capability_matches(&a, "please fix this RUST bug"));
    }

    #[test]
    fn no_match_when_capability_absent() {
        let a = agent(vec!["python"]);
        assert!(!capability_matches(&a, "fix this rust bug"));
    }
}
