use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fleet_core::{BranchPattern, TaskBatch};
use orchestrator::{
    BackendChoice, CleanupReport, CompletionRead, Fleet, FleetConfig, LockRegistry,
    OrchestratorError, RunOptions, TaskOutcome,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vcs::WorkspaceMode;

/// Exit status of a run in which at least one task failed.
const EXIT_TASK_FAILURES: u8 = 2;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Fan out development tasks to isolated workspaces and agent sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository to operate on.
    #[arg(short, long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .fleet/config.toml
    Init,
    /// Provision a workspace and launch a session for every task in a batch
    Run {
        /// Task batch document (JSON)
        batch: PathBuf,

        #[arg(long)]
        mode: Option<WorkspaceMode>,

        #[arg(long)]
        pattern: Option<String>,

        #[arg(long)]
        base_dir: Option<PathBuf>,

        #[arg(long)]
        backend: Option<BackendChoice>,

        #[arg(long)]
        agent_command: Option<String>,

        /// Create workspaces and context files without starting sessions
        #[arg(long)]
        provision_only: bool,

        #[arg(long)]
        json: bool,
    },
    /// List orchestration runs that have not been cleaned up
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the recorded state of a run
    Show { session_id: String },
    /// Per-task session liveness and completion status
    Status {
        session_id: String,

        #[arg(long)]
        json: bool,
    },
    /// Kill a run's sessions, remove its workspaces and archive it
    Cleanup { session_id: String },
    /// Advisory locks shared by the tasks of a run
    Locks {
        session_id: String,

        #[command(subcommand)]
        action: LockAction,
    },
}

#[derive(Subcommand)]
enum LockAction {
    List,
    Acquire {
        resource: String,
        #[arg(long)]
        owner: String,
    },
    Release {
        resource: String,
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let repo = cli.repo;
    match cli.command {
        Commands::Init => init(&repo).await,
        Commands::Run {
            batch,
            mode,
            pattern,
            base_dir,
            backend,
            agent_command,
            provision_only,
            json,
        } => {
            let mut config = Fleet::load_config(&repo).await?;
            if let Some(mode) = mode {
                config.workspace.mode = mode;
            }
            if let Some(pattern) = pattern {
                config.workspace.branch_pattern = BranchPattern::new(pattern)?;
            }
            if let Some(base_dir) = base_dir {
                config.workspace.base_dir = Some(base_dir);
            }
            if let Some(backend) = backend {
                config.session.backend = backend;
            }
            if let Some(agent_command) = agent_command {
                config.session.agent_command = agent_command;
            }
            run(&repo, config, &batch, RunOptions { provision_only }, json).await
        }
        Commands::List { json } => list(&repo, json).await,
        Commands::Show { session_id } => show(&repo, &session_id).await,
        Commands::Status { session_id, json } => status(&repo, &session_id, json).await,
        Commands::Cleanup { session_id } => cleanup(&repo, &session_id).await,
        Commands::Locks { session_id, action } => locks(&repo, &session_id, action).await,
    }
}

async fn open(repo: &Path) -> Result<Fleet> {
    let config = Fleet::load_config(repo).await?;
    Ok(Fleet::open(repo, config).await?)
}

async fn init(repo: &Path) -> Result<ExitCode> {
    match Fleet::init(repo).await {
        Ok(path) => println!("Wrote {}", path.display()),
        Err(OrchestratorError::Conflict(_)) => {
            println!("Already initialized: {}", repo.join(".fleet/config.toml").display());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(
    repo: &Path,
    config: FleetConfig,
    batch_path: &Path,
    options: RunOptions,
    json: bool,
) -> Result<ExitCode> {
    let batch = TaskBatch::load(batch_path)
        .with_context(|| format!("Failed to read task batch {}", batch_path.display()))?;
    let fleet = Fleet::open(repo, config).await?;

    if fleet.config().workspace.mode == WorkspaceMode::ShadowCopy {
        tracing::warn!("shadow-copy workspaces have no version control; changes cannot be committed");
    }

    let report = fleet.orchestrator().run_batch(&batch, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("Run {} ({})", report.session_id, report.status);
        println!();
        for outcome in &report.outcomes {
            match outcome {
                TaskOutcome::Launched { task_key, session } => {
                    println!("  ● {:<16} launched in {}", task_key, session)
                }
                TaskOutcome::Provisioned { task_key } => {
                    println!("  ◐ {:<16} provisioned", task_key)
                }
                TaskOutcome::Skipped { task_key, session } => {
                    println!("  ○ {:<16} skipped, {} already running", task_key, session)
                }
                TaskOutcome::Failed {
                    task_key,
                    stage,
                    error,
                } => println!("  ✗ {:<16} {} failed: {}", task_key, stage, error),
            }
        }
        println!();
        println!("Workspaces: {}", fleet.base_dir().display());
        println!("Clean up with: fleet cleanup {}", report.session_id);
    }

    if report.has_failures() {
        return Ok(ExitCode::from(EXIT_TASK_FAILURES));
    }
    Ok(ExitCode::SUCCESS)
}

async fn list(repo: &Path, json: bool) -> Result<ExitCode> {
    let runs = open(repo).await?.lifecycle().list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(ExitCode::SUCCESS);
    }

    if runs.is_empty() {
        println!("No active runs.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<28} {:<9} {:>5} {:>10} {:>5} {:>6}",
        "SESSION", "STATUS", "TASKS", "WORKSPACES", "LIVE", "FAILED"
    );
    for run in runs {
        println!(
            "{:<28} {:<9} {:>5} {:>10} {:>5} {:>6}",
            run.session_id,
            run.status.as_str(),
            run.tasks,
            run.workspaces,
            format!("{}/{}", run.live_sessions, run.sessions),
            run.failures
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn show(repo: &Path, session_id: &str) -> Result<ExitCode> {
    let state = open(repo).await?.lifecycle().show(session_id).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(ExitCode::SUCCESS)
}

async fn status(repo: &Path, session_id: &str, json: bool) -> Result<ExitCode> {
    let report = open(repo).await?.lifecycle().status(session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Run {} ({})", report.session_id, report.status);
    println!();
    for task in &report.tasks {
        let session = match (&task.session, task.alive) {
            (Some(name), true) => format!("{} alive", name),
            (Some(name), false) => format!("{} exited", name),
            (None, _) => "no session".to_string(),
        };
        let completion = match &task.completion {
            CompletionRead::Missing => "no status yet".to_string(),
            CompletionRead::Unreadable { reason } => format!("unreadable status: {}", reason),
            CompletionRead::Status { status } => {
                let state = serde_json::to_value(status.state)?;
                format!("{} {}", state.as_str().unwrap_or("?"), status.summary)
            }
        };
        println!("  {:<16} {:<28} {}", task.task_key, session, completion.trim_end());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cleanup(repo: &Path, session_id: &str) -> Result<ExitCode> {
    match open(repo).await?.lifecycle().cleanup(session_id).await {
        Ok(report) => {
            print_cleanup(&report);
            if let Some(archived) = &report.archived_to {
                println!("Archived to {}", archived.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(OrchestratorError::CleanupPartialFailure { report, .. }) => {
            print_cleanup(&report);
            for failure in &report.failures {
                eprintln!("  ✗ {}: {}", failure.resource, failure.error);
            }
            bail!(
                "cleanup of {} incomplete; fix the errors above and run it again",
                session_id
            )
        }
        Err(e) => Err(e.into()),
    }
}

fn print_cleanup(report: &CleanupReport) {
    println!(
        "Sessions: {} killed, {} already gone",
        report.sessions_killed.len(),
        report.sessions_missing.len()
    );
    println!(
        "Workspaces: {} removed, {} already gone",
        report.workspaces_removed.len(),
        report.workspaces_missing.len()
    );
}

async fn locks(repo: &Path, session_id: &str, action: LockAction) -> Result<ExitCode> {
    let fleet = open(repo).await?;
    // Only runs that exist have a registry.
    fleet.lifecycle().show(session_id).await?;
    let registry = fleet.locks(session_id);

    match action {
        LockAction::List => {
            for lock in registry.list().await? {
                println!(
                    "{:<32} {:<16} {}",
                    lock.resource,
                    lock.owner,
                    lock.acquired_at.to_rfc3339()
                );
            }
        }
        LockAction::Acquire { resource, owner } => {
            registry.acquire(&resource, &owner).await?;
            println!("{} acquired by {}", resource, owner);
        }
        LockAction::Release { resource, owner } => {
            if registry.release(&resource, &owner).await? {
                println!("{} released", resource);
            } else {
                println!("{} was not held", resource);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet=info,orchestrator=info,vcs=info".into()),
        )
        .init();
}
