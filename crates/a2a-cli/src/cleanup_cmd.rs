//! `a2ahub cleanup`: drop the configured database. Intended for test
//! harnesses that need a clean store between runs; never invoked by
//! `serve`.

use anyhow::Result;

use a2a_db::config::DbConfig;
use a2a_db::pool;

pub async fn run_cleanup(db_config: &DbConfig) -> Result<()> {
    pool::drop_database(db_config).await?;
    println!(
        "Dropped database {}.",
        db_config.database_name().unwrap_or("<unknown>")
    );
    Ok(())
}
