//! docqueue: operator tool for a `DynamoDB`-backed task queue.
//!
//! Creates task batches, reports queue status and results, and purges the
//! table. Workers embed the library instead of shelling out to this tool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docqueue::store::dynamodb::{DynamoDbStore, DEFAULT_STATE_INDEX, DEFAULT_TABLE_NAME};
use docqueue::{LifecycleState, SourceMap, TaskController};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Distributed task queue operator tool
#[derive(Parser)]
#[command(name = "docqueue")]
#[command(about = "Create, inspect and purge docqueue tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// DynamoDB table holding task records
    #[arg(long, env = "DOCQUEUE_TABLE", default_value = DEFAULT_TABLE_NAME, global = true)]
    table: String,

    /// Global secondary index on lifecycleState/creationEpochMs
    #[arg(long, env = "DOCQUEUE_STATE_INDEX", default_value = DEFAULT_STATE_INDEX, global = true)]
    state_index: String,

    /// Use strongly consistent reads where DynamoDB supports them
    #[arg(long, env = "DOCQUEUE_CONSISTENT_READS", global = true)]
    consistent_reads: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create one ready task per line of an input file
    Create {
        /// Job the tasks belong to
        #[arg(long, env = "DOCQUEUE_JOB")]
        job: String,

        /// File with one task input per line
        #[arg(long)]
        input_file: PathBuf,

        /// JSON object mapping source file names to contents
        #[arg(long)]
        sources_file: Option<PathBuf>,
    },

    /// Count ready tasks per job
    Ready,

    /// Count tasks per job and lifecycle state
    Status,

    /// Print the results of a job's done tasks, one per line
    Results {
        /// Job to report on
        #[arg(long, env = "DOCQUEUE_JOB")]
        job: String,
    },

    /// Delete every task in the table, across all jobs
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let store = DynamoDbStore::from_env_with_table(&cli.table)
        .await
        .with_state_index(&cli.state_index)
        .with_consistent_reads(cli.consistent_reads);
    let store = Arc::new(store);

    match cli.command {
        Commands::Create {
            job,
            input_file,
            sources_file,
        } => {
            let text = std::fs::read_to_string(&input_file)
                .with_context(|| format!("Failed to read {}", input_file.display()))?;
            let inputs: Vec<&str> = text.lines().filter(|line| !line.is_empty()).collect();
            let sources = match sources_file {
                Some(path) => read_sources(&path)?,
                None => SourceMap::new(),
            };

            let controller = TaskController::new(store, job);
            let keys = controller.create_tasks(&inputs, &sources).await?;
            println!("created {} tasks for job {}", keys.len(), controller.job_name());
        },
        Commands::Ready => {
            let controller = TaskController::new(store, "");
            let counts: BTreeMap<_, _> =
                controller.query_tasks_ready().await?.into_iter().collect();
            for (job, count) in counts {
                println!("{job}\t{count}");
            }
        },
        Commands::Status => {
            let controller = TaskController::new(store, "");
            let counts: BTreeMap<_, _> = controller.query_task_state().await?.into_iter().collect();
            for (job, states) in counts {
                let line: Vec<String> = LifecycleState::ALL
                    .iter()
                    .map(|state| format!("{state}={}", states.get(state).copied().unwrap_or(0)))
                    .collect();
                println!("{job}\t{}", line.join(" "));
            }
        },
        Commands::Results { job } => {
            let controller = TaskController::new(store, job);
            for result in controller.query_results_for_job().await? {
                println!("{result}");
            }
        },
        Commands::Purge { yes } => {
            if !yes {
                bail!("purge deletes every task in table {}; pass --yes to confirm", cli.table);
            }
            let controller = TaskController::new(store, "");
            let deleted = controller.delete_all_tasks().await?;
            println!("deleted {deleted} tasks");
        },
    }

    Ok(())
}

fn read_sources(path: &Path) -> Result<SourceMap> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON object of strings", path.display()))
}

/// Initialize logging (`RUST_LOG`, default `info`)
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
