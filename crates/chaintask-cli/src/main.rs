mod broker;
mod config;
mod task_cmds;
mod work_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

use chaintask_db::config::DbConfig;
use chaintask_db::pool;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "chaintask", about = "Control plane for LLM + Web3 agent tasks")]
struct Cli {
    /// Database URL (overrides CHAINTASK_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Queue URL, redis:// or amqp:// (overrides CHAINTASK_QUEUE_URL);
    /// omit to run over the in-process queue
    #[arg(long, global = true)]
    queue_url: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and run migrations
    DbInit,
    /// Submit a new agent task
    Submit {
        /// What the agent should do
        #[arg(long)]
        goal: String,
        /// Optional client-chosen task id (submitting twice is idempotent)
        #[arg(long)]
        id: Option<String>,
        /// Chain read action forwarded to the executor
        #[arg(long)]
        chain_action: Option<String>,
        /// Address forwarded to the executor
        #[arg(long)]
        address: Option<String>,
        /// Metadata as a JSON object, stored and returned verbatim
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Show a task by id
    Get {
        task_id: String,
    },
    /// List tasks with optional filters
    List {
        /// Comma-separated statuses (pending,running,succeeded,failed)
        #[arg(long)]
        status: Option<String>,
        /// Substring to search for across task fields
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Oldest-first instead of the default newest-first
        #[arg(long)]
        ascending: bool,
    },
    /// Show aggregate task counts
    Stats {
        /// Comma-separated statuses (pending,running,succeeded,failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Block until a task reaches a terminal status
    Wait {
        task_id: String,
        /// Poll interval in seconds
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Run a worker pool against the configured queue
    Work {
        /// Number of concurrent workers
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Executor to run tasks with
        #[arg(long, value_enum, default_value = "echo")]
        executor: work_cmd::ExecutorKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = CliConfig::from_env();
    if let Some(url) = cli.database_url {
        config.db = DbConfig::new(url);
    }
    if let Some(url) = cli.queue_url {
        config.queue_url = Some(url);
    }

    match cli.command {
        Commands::DbInit => {
            let pool = pool::bootstrap(&config.db).await?;
            pool.close().await;
            println!("database ready at {}", config.db.database_url);
            Ok(())
        }
        Commands::Submit {
            goal,
            id,
            chain_action,
            address,
            metadata,
        } => {
            task_cmds::submit(&config, goal, id, chain_action, address, metadata, cli.json).await
        }
        Commands::Get { task_id } => task_cmds::get(&config, &task_id, cli.json).await,
        Commands::List {
            status,
            query,
            limit,
            offset,
            ascending,
        } => task_cmds::list(&config, status, query, limit, offset, ascending, cli.json).await,
        Commands::Stats { status } => task_cmds::stats(&config, status, cli.json).await,
        Commands::Wait { task_id, interval } => {
            task_cmds::wait(&config, &task_id, interval, cli.json).await
        }
        Commands::Work { workers, executor } => {
            work_cmd::run(&config, workers, executor).await
        }
    }
}
