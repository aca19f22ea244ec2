//! `a2ahub workflow recover` / `a2ahub workflow status`: run or inspect the
//! Workflow Recovery pass (§4.9) on demand.

use anyhow::Result;
use sqlx::PgPool;

use a2a_core::recovery;
use a2a_db::queries::workflow as workflow_db;

pub async fn run_recover(pool: &PgPool) -> Result<()> {
    let report = recovery::run(pool).await?;
    println!("found:     {}", report.found.len());
    for item in &report.found {
        println!("  - {} (task {})", item.code(), item.task_id());
    }
    println!("remaining: {}", report.remaining.len());
    for item in &report.remaining {
        println!("  - {} (task {})", item.code(), item.task_id());
    }
    println!("healthy:   {}", report.healthy);
    Ok(())
}

pub async fn run_status(pool: &PgPool) -> Result<()> {
    let workflow = workflow_db::get_or_init(pool).await?;
    println!("name:               {}", workflow.name);
    println!("status:             {}", workflow.status);
    println!(
        "last_recovery_time: {}",
        workflow
            .last_recovery_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "recovery_status:    {}",
        workflow.recovery_status.as_deref().unwrap_or("-")
    );
    Ok(())
}
