//! `a2ahub agent ...`: register/list/show/update/deregister a worker agent.
//! Each sub-command opens a pool, issues one direct query, and prints a
//! plain summary.

use anyhow::{Context, Result};
use sqlx::PgPool;

use a2a_core::registry;
use a2a_db::models::Agent;

#[allow(clippy::too_many_arguments)]
pub async fn run_register(
    pool: &PgPool,
    agent_id: &str,
    owner_role: &str,
    capabilities: Vec<String>,
    allowed_tools: Vec<String>,
    capacity: i32,
    completion_limit_per_minute: i32,
    worker_type: Option<&str>,
) -> Result<()> {
    let agent = registry::register(
        pool,
        agent_id,
        owner_role,
        capabilities,
        allowed_tools,
        capacity,
        completion_limit_per_minute,
        worker_type,
    )
    .await?;
    print_agent(&agent);
    Ok(())
}

pub async fn run_list(pool: &PgPool) -> Result<()> {
    let agents = registry::list(pool).await?;
    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(());
    }

    println!(
        "{:<20} {:<18} {:<8} {:>10} {:>10} {:<10}",
        "AGENT_ID", "OWNER_ROLE", "ONLINE", "CAPACITY", "AVAILABLE", "WORKER_TYPE"
    );
    println!("{}", "-".repeat(82));
    for agent in &agents {
        println!(
            "{:<20} {:<18} {:<8} {:>10} {:>10} {:<10}",
            agent.agent_id,
            agent.owner_role,
            agent.online,
            agent.capacity,
            agent.available_capacity,
            agent.worker_type.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn run_show(pool: &PgPool, agent_id: &str) -> Result<()> {
    let agent = registry::get(pool, agent_id)
        .await?
        .with_context(|| format!("agent {agent_id} not found"))?;
    print_agent(&agent);
    Ok(())
}

pub async fn run_update(
    pool: &PgPool,
    agent_id: &str,
    capacity: Option<i32>,
    completion_limit_per_minute: Option<i32>,
    online: Option<bool>,
) -> Result<()> {
    let updated = registry::update(pool, agent_id, capacity, completion_limit_per_minute, online).await?;
    if !updated {
        anyhow::bail!("agent {agent_id} not found");
    }
    let agent = registry::get(pool, agent_id)
        .await?
        .context("agent disappeared after update")?;
    print_agent(&agent);
    Ok(())
}

pub async fn run_deregister(pool: &PgPool, agent_id: &str) -> Result<()> {
    let removed = registry::deregister(pool, agent_id).await?;
    if !removed {
        anyhow::bail!("agent {agent_id} not found");
    }
    println!("agent {agent_id} deregistered");
    Ok(())
}

fn print_agent(agent: &Agent) {
    println!("agent_id:        {}", agent.agent_id);
    println!("owner_role:      {}", agent.owner_role);
    println!("online:          {}", agent.online);
    println!("capacity:        {}/{}", agent.available_capacity, agent.capacity);
    println!(
        "completion_rate: {}/{}",
        agent.current_completion_count, agent.completion_limit_per_minute
    );
    println!("worker_type:     {}", agent.worker_type.as_deref().unwrap_or("-"));
    println!("capabilities:    {}", agent.capability_list().join(", "));
    println!("last_seen:       {}", agent.last_seen);
}
