mod agent_cmds;
mod cleanup_cmd;
mod config;
mod dlq_cmds;
mod rbac;
mod serve_cmd;
mod task_cmds;
mod workflow_cmds;

#[cfg(test)]
mod test_util;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use a2a_db::config::DbConfig;
use a2a_db::models::TaskStatus;
use a2a_db::pool;

use config::HubConfig;

#[derive(Parser)]
#[command(name = "a2ahub", version, about = "A2A Task Hub: durable multi-agent task-dispatch broker")]
struct Cli {
    /// Database URL (overrides A2A_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file (no database required) and print a freshly
    /// generated SECRET_KEY candidate.
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value_t = DbConfig::DEFAULT_URL.to_string())]
        db_url: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database (if absent) and run migrations.
    DbInit,
    /// Run the HTTP server: every endpoint in spec §6, plus the Lease
    /// Sweeper and Priority Ager background loops.
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Drop the configured database. Test-harness use only; never invoked
    /// by `serve`.
    Cleanup,
    /// Task creation, lookup, dispatch, heartbeat, and result submission.
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Evaluate the Routing Engine against a task's attributes.
    Routing {
        #[command(subcommand)]
        command: RoutingCommands,
    },
    /// Dead-letter queue inspection and audited replay.
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Worker agent lifecycle: register, list, show, update, deregister.
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Workflow consistency recovery.
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a task (routes and assigns it to an eligible agent).
    #[allow(clippy::too_many_arguments)]
    Create {
        #[arg(long)]
        task_code: String,
        #[arg(long)]
        area: String,
        #[arg(long)]
        owner_role: String,
        #[arg(long)]
        instructions: String,
        #[arg(long)]
        how_to_repro: String,
        #[arg(long)]
        expected: String,
        #[arg(long)]
        evidence_requirements: String,
        #[arg(long)]
        message_id: Option<String>,
        #[arg(long)]
        priority: Option<i32>,
        #[arg(long)]
        timeout_seconds: Option<i32>,
        #[arg(long)]
        max_retries: Option<i32>,
        #[arg(long)]
        retry_backoff_sec: Option<i32>,
        /// Comma-separated task_id list this task depends on.
        #[arg(long, value_delimiter = ',')]
        dependencies: Vec<String>,
    },
    /// Look up a task by exactly one selector.
    Status {
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        task_code: Option<String>,
        #[arg(long)]
        message_id: Option<String>,
    },
    /// Dispatch the next eligible task to an agent.
    Next {
        #[arg(long)]
        agent_id: String,
    },
    /// Extend a RUNNING task's lease.
    Heartbeat {
        #[arg(long)]
        task_id: String,
    },
    /// Submit a result for a task.
    Result {
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        task_code: Option<String>,
        #[arg(long)]
        message_id: Option<String>,
        /// PENDING | RUNNING | DONE | FAIL | DLQ | BLOCKED
        #[arg(long)]
        status: Option<String>,
        /// Result payload as a JSON string.
        #[arg(long)]
        result: Option<String>,
        #[arg(long)]
        reason_code: Option<String>,
        #[arg(long)]
        last_error: Option<String>,
    },
}

#[derive(Subcommand)]
enum RoutingCommands {
    /// Evaluate the routing rule list against a task's attributes without
    /// creating a task.
    Decide {
        #[arg(long)]
        task_code: String,
        #[arg(long)]
        area: String,
        #[arg(long)]
        owner_role: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// Paginated list of dead-letter entries.
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },
    /// Look up one entry by exactly one selector.
    Show {
        #[arg(long)]
        dlq_id: Option<String>,
        #[arg(long)]
        task_code: Option<String>,
        #[arg(long)]
        message_id: Option<String>,
    },
    /// Replay a DLQ entry back to PENDING.
    Replay {
        #[arg(long)]
        dlq_id: String,
        #[arg(long, default_value = "operator")]
        who: String,
        #[arg(long, default_value = "operator replay")]
        why: String,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Register (or re-register) a worker agent.
    #[allow(clippy::too_many_arguments)]
    Register {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        owner_role: String,
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        allowed_tools: Vec<String>,
        #[arg(long, default_value_t = 1)]
        capacity: i32,
        #[arg(long, default_value_t = 60)]
        completion_limit_per_minute: i32,
        #[arg(long)]
        worker_type: Option<String>,
    },
    /// List all registered agents.
    List,
    /// Show one agent.
    Show { agent_id: String },
    /// Update capacity, rate limit, or online status.
    Update {
        agent_id: String,
        #[arg(long)]
        capacity: Option<i32>,
        #[arg(long)]
        completion_limit_per_minute: Option<i32>,
        #[arg(long)]
        online: Option<bool>,
    },
    /// Remove an agent.
    Deregister { agent_id: String },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run the check/repair/re-check consistency pass on demand.
    Recover,
    /// Show the singleton workflow row.
    Status,
}

fn parse_task_status(s: &str) -> Result<TaskStatus> {
    s.to_uppercase()
        .parse::<TaskStatus>()
        .map_err(|e| anyhow::anyhow!("{e}"))
}

/// Execute `a2ahub init`: write a config file and print a SECRET_KEY
/// candidate. The secret is never persisted -- §6 makes it a hard
/// environment-variable requirement with no config-file fallback.
fn cmd_init(db_url: &str, force: bool) -> Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };
    config::save_config(&cfg)?;

    let secret_key = config::generate_secret_key();

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Generated a SECRET_KEY candidate (not written to disk):");
    println!("  SECRET_KEY={secret_key}");
    println!();
    println!("Export it before running `a2ahub serve`, then run `a2ahub db-init`.");

    Ok(())
}

async fn cmd_db_init(cli_db_url: Option<&str>) -> Result<()> {
    let resolved = HubConfig::resolve(cli_db_url)?;

    println!("Initializing a2a_hub database...");
    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("a2ahub db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { db_url, force } = &cli.command {
        cmd_init(db_url, *force)?;
        return Ok(());
    }

    if let Commands::DbInit = &cli.command {
        cmd_db_init(cli.database_url.as_deref()).await?;
        return Ok(());
    }

    if let Commands::Serve { bind, port } = &cli.command {
        let resolved = HubConfig::resolve(cli.database_url.as_deref())?;
        let db_pool = pool::create_pool(&resolved.db_config).await?;
        let result = serve_cmd::run_serve(db_pool.clone(), resolved.secret_key, bind, *port).await;
        db_pool.close().await;
        result?;
        return Ok(());
    }

    if let Commands::Cleanup = &cli.command {
        let resolved = HubConfig::resolve(cli.database_url.as_deref())?;
        cleanup_cmd::run_cleanup(&resolved.db_config).await?;
        return Ok(());
    }

    let resolved = HubConfig::resolve(cli.database_url.as_deref())
        .context("failed to resolve configuration")?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let result = run_command(cli.command, &db_pool, &resolved.secret_key).await;

    db_pool.close().await;
    result
}

async fn run_command(command: Commands, db_pool: &sqlx::PgPool, secret_key: &[u8]) -> Result<()> {
    match command {
        Commands::Init { .. } | Commands::DbInit | Commands::Serve { .. } | Commands::Cleanup => {
            unreachable!("handled before pool creation")
        }
        Commands::Task { command } => match command {
            TaskCommands::Create {
                task_code,
                area,
                owner_role,
                instructions,
                how_to_repro,
                expected,
                evidence_requirements,
                message_id,
                priority,
                timeout_seconds,
                max_retries,
                retry_backoff_sec,
                dependencies,
            } => {
                task_cmds::run_create(
                    db_pool,
                    task_cmds::CreateArgs {
                        task_code,
                        area,
                        owner_role,
                        instructions,
                        how_to_repro,
                        expected,
                        evidence_requirements,
                        message_id,
                        priority,
                        timeout_seconds,
                        max_retries,
                        retry_backoff_sec,
                        dependencies,
                    },
                )
                .await
            }
            TaskCommands::Status {
                task_id,
                task_code,
                message_id,
            } => {
                task_cmds::run_status(
                    db_pool,
                    task_id.as_deref(),
                    task_code.as_deref(),
                    message_id.as_deref(),
                )
                .await
            }
            TaskCommands::Next { agent_id } => task_cmds::run_next(db_pool, &agent_id).await,
            TaskCommands::Heartbeat { task_id } => task_cmds::run_heartbeat(db_pool, &task_id).await,
            TaskCommands::Result {
                task_id,
                task_code,
                message_id,
                status,
                result,
                reason_code,
                last_error,
            } => {
                let status = status.as_deref().map(parse_task_status).transpose()?;
                let result = result
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .context("--result must be valid JSON")?;
                task_cmds::run_result(
                    db_pool,
                    secret_key,
                    task_cmds::ResultArgs {
                        task_id,
                        task_code,
                        message_id,
                        status,
                        result,
                        reason_code,
                        last_error,
                    },
                )
                .await
            }
        },
        Commands::Routing { command } => match command {
            RoutingCommands::Decide {
                task_code,
                area,
                owner_role,
                priority,
            } => task_cmds::run_routing_decide(db_pool, &task_code, &area, &owner_role, priority).await,
        },
        Commands::Dlq { command } => match command {
            DlqCommands::List { page, page_size } => dlq_cmds::run_list(db_pool, page, page_size).await,
            DlqCommands::Show {
                dlq_id,
                task_code,
                message_id,
            } => {
                dlq_cmds::run_show(
                    db_pool,
                    dlq_id.as_deref(),
                    task_code.as_deref(),
                    message_id.as_deref(),
                )
                .await
            }
            DlqCommands::Replay { dlq_id, who, why } => dlq_cmds::run_replay(db_pool, &dlq_id, &who, &why).await,
        },
        Commands::Agent { command } => match command {
            AgentCommands::Register {
                agent_id,
                owner_role,
                capabilities,
                allowed_tools,
                capacity,
                completion_limit_per_minute,
                worker_type,
            } => {
                agent_cmds::run_register(
                    db_pool,
                    &agent_id,
                    &owner_role,
                    capabilities,
                    allowed_tools,
                    capacity,
                    completion_limit_per_minute,
                    worker_type.as_deref(),
                )
                .await
            }
            AgentCommands::List => agent_cmds::run_list(db_pool).await,
            AgentCommands::Show { agent_id } => agent_cmds::run_show(db_pool, &agent_id).await,
            AgentCommands::Update {
                agent_id,
                capacity,
                completion_limit_per_minute,
                online,
            } => agent_cmds::run_update(db_pool, &agent_id, capacity, completion_limit_per_minute, online).await,
            AgentCommands::Deregister { agent_id } => agent_cmds::run_deregister(db_pool, &agent_id).await,
        },
        Commands::Workflow { command } => match command {
            WorkflowCommands::Recover => workflow_cmds::run_recover(db_pool).await,
            WorkflowCommands::Status => workflow_cmds::run_status(db_pool).await,
        },
    }
}

#[allow(dead_code)]
fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid UUID: {s}"))
}
