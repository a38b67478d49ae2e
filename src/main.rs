//! # Cellar CLI
//!
//! Usage:
//!   cellar serve                         # Run the scheduler until Ctrl-C
//!   cellar jobs put job.json             # Create or replace a job
//!   cellar jobs list --owner alice       # List jobs
//!   cellar trigger nightly               # Run a job once and wait for its task
//!   cellar tasks prune nightly --keep 10 # Trim a job's task history

use anyhow::{Context, Result, bail};
use cellar_core::{CellarConfig, Clients, JobTriggerEvent};
use cellar_jobs::{Broker, DeleteTasksRequest, Job, JobService, JobStore, ListJobsRequest, Task, TaskStatus};
use cellar_scheduler::ActionRegistry;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cellar", version, about = "📅 Cellar: event-driven job scheduler")]
struct Cli {
    /// Config file (default: ~/.cellar/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Serve,
    /// Manage job definitions
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Inspect and prune tasks
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
    /// Run a job now and wait for its task to end
    Trigger {
        job_id: String,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "60")]
        wait_secs: u64,
    },
}

#[derive(Subcommand)]
enum JobsCommand {
    /// Create or replace a job from a JSON or TOML file
    Put { file: PathBuf },
    /// Print one job as JSON
    Get {
        job_id: String,
        /// Include tasks in this state (any, running, finished, error, ...)
        #[arg(long)]
        tasks: Option<String>,
    },
    /// List jobs
    List {
        #[arg(long)]
        owner: Option<String>,
        /// Only jobs reacting to node events
        #[arg(long)]
        events_only: bool,
        /// Only jobs carrying a schedule
        #[arg(long)]
        timers_only: bool,
    },
    /// Delete a job and its tasks
    Delete { job_id: String },
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List tasks
    List {
        /// Restrict to one job
        #[arg(long)]
        job: Option<String>,
        #[arg(long, default_value = "any")]
        status: String,
    },
    /// Delete old tasks of a job
    Prune {
        job_id: String,
        /// Keep this many of the most recent tasks
        #[arg(long, default_value = "20")]
        keep: usize,
        /// Comma separated states to prune
        #[arg(long, default_value = "finished,error,interrupted")]
        statuses: String,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(path: Option<&Path>) -> Result<CellarConfig> {
    let config = match path {
        Some(path) => CellarConfig::load_from(path)?,
        None => CellarConfig::load()?,
    };
    Ok(config)
}

fn open_service(config: &CellarConfig) -> Result<Arc<JobService>> {
    let db_path = expand_path(&config.store.path);
    let store = JobStore::open(Path::new(&db_path)).with_context(|| format!("opening {db_path}"))?;
    tracing::debug!("🗄️ Job store at {db_path}");
    Ok(Arc::new(JobService::new(
        Arc::new(store),
        Arc::new(Broker::new(config.bus.capacity)),
    )))
}

fn registry() -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    cellar_actions::register_builtins(&mut registry);
    Arc::new(registry)
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    TaskStatus::parse(raw).with_context(|| format!("unknown task status '{raw}'"))
}

fn read_job(file: &Path) -> Result<Job> {
    let content = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let job = match file.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)?,
        _ => serde_json::from_str(&content)?,
    };
    Ok(job)
}

fn print_task(task: &Task) {
    println!(
        "{:<38} {:<20} {:<12} {:>3} action(s)  {}",
        task.id,
        task.job_id,
        task.status.to_string(),
        task.action_logs.len(),
        task.status_message
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cellar=debug,cellar_scheduler=debug,cellar_jobs=debug,cellar_actions=debug"
    } else {
        "cellar=info,cellar_scheduler=info,cellar_jobs=info,cellar_actions=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let jobs = open_service(&config)?;

    match cli.command {
        Command::Serve => serve(&config, jobs).await,
        Command::Jobs { command } => jobs_command(&jobs, command).await,
        Command::Tasks { command } => tasks_command(&jobs, command).await,
        Command::Trigger { job_id, wait_secs } => trigger(&config, jobs, &job_id, wait_secs).await,
    }
}

async fn serve(config: &CellarConfig, jobs: Arc<JobService>) -> Result<()> {
    let registry = registry();
    println!("📅 Cellar v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Store:    {}", expand_path(&config.store.path));
    println!("   🧩 Actions:  {}", registry.ids().join(", "));
    println!("   ⚙️  Workers:  {} per job by default", config.scheduler.default_max_concurrency);
    println!();

    let handle = cellar_scheduler::start(&config.scheduler, jobs, Clients::in_memory(), registry).await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Interrupted, shutting down");
    handle.shutdown();
    Ok(())
}

async fn jobs_command(jobs: &JobService, command: JobsCommand) -> Result<()> {
    match command {
        JobsCommand::Put { file } => {
            let job = jobs.put_job(read_job(&file)?).await?;
            println!("✅ Job '{}' ({}) saved", job.label, job.id);
        }
        JobsCommand::Get { job_id, tasks } => {
            let load = match tasks.as_deref() {
                Some(raw) => parse_status(raw)?,
                None => TaskStatus::Unknown,
            };
            let job = jobs.get_job(&job_id, load).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        JobsCommand::List {
            owner,
            events_only,
            timers_only,
        } => {
            let request = ListJobsRequest {
                owner: owner.unwrap_or_default(),
                events_only,
                timers_only,
                ..Default::default()
            };
            let mut stream = jobs.list_jobs(request).await?;
            let mut count = 0;
            while let Some(job) = stream.next().await {
                count += 1;
                println!(
                    "{:<20} {:<30} {:<12} {}{}",
                    job.id,
                    job.label,
                    job.owner,
                    job.event_names.join(","),
                    if job.inactive { " (inactive)" } else { "" }
                );
            }
            println!("{count} job(s)");
        }
        JobsCommand::Delete { job_id } => {
            jobs.delete_job(&job_id).await?;
            println!("🗑️ Job {job_id} deleted");
        }
    }
    Ok(())
}

async fn tasks_command(jobs: &JobService, command: TasksCommand) -> Result<()> {
    match command {
        TasksCommand::List { job, status } => {
            let status = parse_status(&status)?;
            let tasks: Vec<Task> = jobs
                .list_tasks(job.as_deref().unwrap_or(""), status)
                .await?
                .collect()
                .await;
            for task in &tasks {
                print_task(task);
            }
            println!("{} task(s)", tasks.len());
        }
        TasksCommand::Prune {
            job_id,
            keep,
            statuses,
        } => {
            let statuses = statuses
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_status)
                .collect::<Result<Vec<_>>>()?;
            let deleted = jobs
                .delete_tasks(DeleteTasksRequest {
                    job_id: job_id.clone(),
                    statuses,
                    prune_limit: keep,
                    ..Default::default()
                })
                .await?;
            println!("🧹 {} task(s) of {job_id} deleted", deleted.len());
        }
    }
    Ok(())
}

/// Start an in-process scheduler, fire the job once, and wait for the task.
async fn trigger(config: &CellarConfig, jobs: Arc<JobService>, job_id: &str, wait_secs: u64) -> Result<()> {
    let job = jobs.get_job(job_id, TaskStatus::Unknown).await?;
    let mut task_events = jobs.broker().task_events.subscribe();
    let handle = cellar_scheduler::start(&config.scheduler, jobs.clone(), Clients::in_memory(), registry()).await?;
    jobs.broker().timer_events.publish(JobTriggerEvent::run_now(&job.id));
    println!("▶️ Triggered '{}' ({})", job.label, job.id);

    let ended = tokio::time::timeout(Duration::from_secs(wait_secs), async {
        while let Some(change) = task_events.next().await {
            if let Some(task) = change.task_updated
                && task.job_id == job.id
                && task.status.is_terminal()
            {
                return Some(task);
            }
        }
        None
    })
    .await;
    handle.shutdown();

    match ended {
        Ok(Some(task)) => {
            print_task(&task);
            if task.status != TaskStatus::Finished {
                bail!("task ended as {}", task.status);
            }
            Ok(())
        }
        Ok(None) => bail!("task event stream closed"),
        Err(_) => bail!("no task of {job_id} ended within {wait_secs}s"),
    }
}
