//! `a2ahub dlq ...`: list/show/replay dead-letter entries. A read-then-print
//! shape for the paginated list and single-entry lookups, plus the replay
//! mutation.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use a2a_core::dlq;
use a2a_db::models::DlqEntry;

pub async fn run_list(pool: &PgPool, page: i64, page_size: i64) -> Result<()> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 100);
    let offset = (page - 1) * page_size;

    let entries = dlq::list(pool, page_size, offset).await?;
    let total = dlq::count(pool).await?;

    if entries.is_empty() {
        println!("No DLQ entries (page {page}, total {total}).");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<24} {:<18}",
        "DLQ_ID", "TASK_CODE", "REASON_CODE", "REPLAYED"
    );
    println!("{}", "-".repeat(102));
    for entry in &entries {
        let replayed = entry
            .replay_when
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<20} {:<24} {:<18}",
            entry.dlq_id,
            entry.task_code,
            entry.reason_code.as_deref().unwrap_or("-"),
            replayed,
        );
    }
    println!("\npage {page} of {} (page_size {page_size}, total {total})", (total + page_size - 1).max(1) / page_size);
    Ok(())
}

pub async fn run_show(
    pool: &PgPool,
    dlq_id: Option<&str>,
    task_code: Option<&str>,
    message_id: Option<&str>,
) -> Result<()> {
    let entry = match (dlq_id, task_code, message_id) {
        (Some(id), None, None) => {
            let id = Uuid::parse_str(id).with_context(|| format!("invalid dlq ID: {id}"))?;
            dlq::get(pool, id).await?
        }
        (None, Some(code), None) => dlq::get_by_task_code(pool, code).await?,
        (None, None, Some(mid)) => dlq::get_by_message_id(pool, mid).await?,
        _ => anyhow::bail!("exactly one of --dlq-id, --task-code, --message-id is required"),
    };
    let entry = entry.context("dlq entry not found")?;
    print_entry(&entry);
    Ok(())
}

pub async fn run_replay(pool: &PgPool, dlq_id: &str, who: &str, why: &str) -> Result<()> {
    let id = Uuid::parse_str(dlq_id).with_context(|| format!("invalid dlq ID: {dlq_id}"))?;
    let task = dlq::replay(pool, id, who, why).await?;
    println!("replayed dlq entry {id}: task {} is now {}", task.task_id, task.status);
    Ok(())
}

fn print_entry(entry: &DlqEntry) {
    println!("dlq_id:      {}", entry.dlq_id);
    println!("task_id:     {}", entry.task_id);
    println!("task_code:   {}", entry.task_code);
    println!("message_id:  {}", entry.message_id.as_deref().unwrap_or("-"));
    println!("reason_code: {}", entry.reason_code.as_deref().unwrap_or("-"));
    println!("last_error:  {}", entry.last_error.as_deref().unwrap_or("-"));
    println!("trace_id:    {}", entry.trace_id.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()));
    println!("created_at:  {}", entry.created_at);
    if let Some(who) = &entry.replay_who {
        println!("replay_who:  {who}");
        println!("replay_when: {}", entry.replay_when.map(|t| t.to_string()).unwrap_or_default());
        println!("replay_why:  {}", entry.replay_why.as_deref().unwrap_or("-"));
    }
}
