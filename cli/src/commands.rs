//! Operator command surface: argument parsing and dispatch.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use envconfig::Envconfig;
use queue_core::config::ConfigKey;
use queue_core::{JobState, NewJob, Store};
use queue_worker::{Worker, WorkerError, WorkerSettings};
use serde::Deserialize;

use crate::manager::WorkerManager;
use crate::output;

#[derive(Parser)]
#[command(name = "queuectl", version, about = "CLI-driven persistent background job queue")]
pub struct Cli {
    /// Path to the queue database file.
    #[arg(long, env = "QUEUECTL_DB", default_value = "queuectl.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job from a JSON spec, e.g. '{"id":"job1","command":"sleep 2"}'
    Enqueue { spec: String },

    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        cmd: WorkerCommand,
    },

    /// Show job state counts and active workers
    Status,

    /// List jobs, optionally filtered by state
    List {
        #[arg(long, value_parser = parse_state)]
        state: Option<JobState>,
    },

    /// Inspect and re-arm the dead letter queue
    Dlq {
        #[command(subcommand)]
        cmd: DlqCommand,
    },

    /// Read and write queue configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Start worker processes
    Start {
        /// Number of workers to start
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Stop all running workers, letting each finish its current job
    Stop,

    /// Run a single worker in the foreground. Spawned by `worker start`.
    #[command(hide = true)]
    Run {
        #[arg(long)]
        worker_id: String,
    },
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List jobs in the dead letter queue
    List,

    /// Move a dead job back to pending with a fresh attempt budget
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Set a configuration value
    Set { key: String, value: String },

    /// Get one configuration value, or all recognized keys when omitted
    Get { key: Option<String> },
}

impl Cli {
    pub async fn run() -> anyhow::Result<()> {
        Cli::parse().execute().await
    }

    async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Enqueue { spec } => enqueue(&self.db, &spec).await,
            Commands::Worker { cmd } => match cmd {
                WorkerCommand::Start { count } => worker_start(&self.db, count).await,
                WorkerCommand::Stop => worker_stop(&self.db).await,
                WorkerCommand::Run { worker_id } => worker_run(&self.db, &worker_id).await,
            },
            Commands::Status => status(&self.db).await,
            Commands::List { state } => list(&self.db, state).await,
            Commands::Dlq { cmd } => match cmd {
                DlqCommand::List => dlq_list(&self.db).await,
                DlqCommand::Retry { id } => dlq_retry(&self.db, &id).await,
            },
            Commands::Config { cmd } => match cmd {
                ConfigCommand::Set { key, value } => config_set(&self.db, &key, &value).await,
                ConfigCommand::Get { key } => config_get(&self.db, key.as_deref()).await,
            },
        }
    }
}

fn parse_state(raw: &str) -> Result<JobState, String> {
    raw.parse().map_err(|_| {
        format!("invalid state '{raw}' (expected pending, processing, completed, failed or dead)")
    })
}

/// The JSON shape accepted by `enqueue`. Unknown fields are ignored.
#[derive(Deserialize)]
struct JobSpec {
    id: Option<String>,
    command: Option<String>,
    max_retries: Option<i64>,
}

fn parse_job_spec(raw: &str) -> anyhow::Result<NewJob> {
    let spec: JobSpec = serde_json::from_str(raw).context("invalid JSON job spec")?;

    let id = spec.id.filter(|s| !s.is_empty());
    let command = spec.command.filter(|s| !s.is_empty());
    let (id, command) = match (id, command) {
        (Some(id), Some(command)) => (id, command),
        _ => bail!("'id' and 'command' are required fields"),
    };

    if let Some(max_retries) = spec.max_retries {
        if max_retries < 1 {
            bail!("'max_retries' must be at least 1");
        }
    }

    Ok(NewJob {
        id,
        command,
        max_retries: spec.max_retries,
    })
}

async fn enqueue(db: &Path, raw: &str) -> anyhow::Result<()> {
    let new = parse_job_spec(raw)?;
    let store = Store::open(db).await?;
    let job = store.create_job(new, Utc::now()).await?;

    println!("Job '{}' enqueued", job.id);
    println!("  Command: {}", job.command);
    println!("  Max retries: {}", job.max_retries);
    Ok(())
}

async fn worker_start(db: &Path, count: u32) -> anyhow::Result<()> {
    if count < 1 {
        bail!("worker count must be at least 1");
    }

    // Create the store up front so N workers don't race the first open.
    Store::open(db).await?;

    let started = WorkerManager::new(db).start(count)?;
    println!("Started {} worker(s)", started.len());
    Ok(())
}

async fn worker_stop(db: &Path) -> anyhow::Result<()> {
    let stopped = WorkerManager::new(db).stop().await?;
    if stopped == 0 {
        println!("No workers running");
    } else {
        println!("All workers stopped");
    }
    Ok(())
}

/// Worker process entry point: run until SIGINT/SIGTERM, then finish the
/// in-flight job and exit.
async fn worker_run(db: &Path, worker_id: &str) -> anyhow::Result<()> {
    let store = Store::open(db).await?;
    let settings = WorkerSettings::init_from_env().map_err(WorkerError::Settings)?;

    let shutdown = queue_worker::shutdown_on_signal(worker_id.to_owned());
    let worker = Worker::new(worker_id, store, &settings, shutdown).await?;
    worker.run().await?;
    Ok(())
}

async fn status(db: &Path) -> anyhow::Result<()> {
    let store = Store::open(db).await?;
    let counts = store.stats_by_state().await?;
    let active = WorkerManager::new(db).active_count()?;

    println!("=== Queue Status ===");
    println!("Active Workers: {active}");
    println!();
    println!("{}", output::state_table(&counts));
    println!();
    println!("Total Jobs: {}", counts.total());
    Ok(())
}

async fn list(db: &Path, state: Option<JobState>) -> anyhow::Result<()> {
    let store = Store::open(db).await?;
    let jobs = store.list_jobs(state).await?;

    if jobs.is_empty() {
        match state {
            Some(state) => println!("No jobs found with state '{state}'"),
            None => println!("No jobs found"),
        }
        return Ok(());
    }

    println!("{}", output::job_table(&jobs));
    Ok(())
}

async fn dlq_list(db: &Path) -> anyhow::Result<()> {
    let store = Store::open(db).await?;
    let jobs = store.list_jobs(Some(JobState::Dead)).await?;

    if jobs.is_empty() {
        println!("No jobs in Dead Letter Queue");
        return Ok(());
    }

    println!("{}", output::dlq_table(&jobs));
    Ok(())
}

async fn dlq_retry(db: &Path, id: &str) -> anyhow::Result<()> {
    let store = Store::open(db).await?;
    let job = store.job(id).await?;

    if job.state != JobState::Dead {
        bail!("job '{id}' is not in the DLQ (current state: {})", job.state);
    }

    store.reset_to_pending(id, Utc::now()).await?;
    println!("Job '{id}' moved back to the pending queue");
    Ok(())
}

async fn config_set(db: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let store = Store::open(db).await?;

    match ConfigKey::parse(key) {
        Some(known) => {
            known.validate(value)?;
            store.set_config(known.as_str(), value).await?;
        }
        // Unrecognized keys are stored untouched; nothing reads them.
        None => store.set_config(key, value).await?,
    }

    println!("Configuration '{key}' set to '{value}'");
    Ok(())
}

async fn config_get(db: &Path, key: Option<&str>) -> anyhow::Result<()> {
    let store = Store::open(db).await?;

    match key {
        Some(raw) => {
            let canonical = match ConfigKey::parse(raw) {
                Some(known) => known.as_str().to_owned(),
                None => raw.to_owned(),
            };
            match store.get_config(&canonical).await? {
                Some(value) => println!("{raw}: {value}"),
                None => bail!("configuration '{raw}' not found"),
            }
        }
        None => {
            println!("Current Configuration:");
            for known in ConfigKey::ALL {
                let value = store
                    .get_config(known.as_str())
                    .await?
                    .unwrap_or_else(|| known.default_value().to_owned());
                println!("  {}: {}", known.as_str(), value);
            }
        }
    }

    Ok(())
}
