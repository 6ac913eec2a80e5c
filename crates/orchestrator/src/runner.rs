//! Batch runner: validates a batch, then provisions and launches its tasks
//! one at a time in input order.
//!
//! A failing task does not stop the batch. Each failure is recorded with the
//! stage it happened in and the remaining tasks are still attempted.

use fleet_core::TaskBatch;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info};
use vcs::Workspace;

use crate::config::TaskConfigOverrides;
use crate::error::{OrchestratorError, Result};
use crate::launcher::{LaunchFailure, LaunchOutcome, SessionLauncher};
use crate::session::session_name;
use crate::state::{OrchestrationStatus, SessionRecord, TaskOutcome};
use crate::state_store::{generate_session_id, StateStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Provision workspaces and write context artifacts without starting sessions.
    pub provision_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub session_id: String,
    pub status: OrchestrationStatus,
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(TaskOutcome::is_failure)
    }

    pub fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    launcher: SessionLauncher,
    store: StateStore,
}

impl Orchestrator {
    pub fn new(launcher: SessionLauncher) -> Self {
        Self {
            store: launcher.store().clone(),
            launcher,
        }
    }

    pub async fn run_batch(&self, batch: &TaskBatch, options: RunOptions) -> Result<BatchReport> {
        self.preflight(batch)?;
        let caller_overrides = TaskConfigOverrides::from_json_map(&batch.config)?;
        self.launcher.coordination().ensure().await?;

        let session_id = generate_session_id();
        let repo_root = self.launcher.coordinator().repo_root().to_path_buf();
        self.store
            .create(&session_id, &repo_root, batch.tasks.clone())
            .await?;
        info!(
            session_id = %session_id,
            tasks = batch.len(),
            provision_only = options.provision_only,
            "Starting orchestration"
        );

        let mut workspaces: Vec<Workspace> = Vec::new();
        let mut sessions: Vec<SessionRecord> = Vec::new();
        let mut outcomes: Vec<TaskOutcome> = Vec::new();

        for task in &batch.tasks {
            let key = task.key.clone();

            if options.provision_only {
                match self.launcher.prepare(&session_id, task, &caller_overrides).await {
                    Ok(prepared) => {
                        workspaces.push(prepared.plan.workspace);
                        outcomes.push(TaskOutcome::Provisioned { task_key: key });
                    }
                    Err(failure) => outcomes.push(record_failure(key, failure, &mut workspaces)),
                }
                continue;
            }

            match self.launcher.launch(&session_id, task, &caller_overrides).await {
                Ok(LaunchOutcome::Launched { prepared, session }) => {
                    workspaces.push(prepared.plan.workspace);
                    outcomes.push(TaskOutcome::Launched {
                        task_key: key,
                        session: session.name.clone(),
                    });
                    sessions.push(session);
                }
                Ok(LaunchOutcome::AlreadyRunning { session }) => {
                    outcomes.push(TaskOutcome::Skipped {
                        task_key: key,
                        session,
                    });
                }
                Err(failure) => outcomes.push(record_failure(key, failure, &mut workspaces)),
            }
        }

        let status = OrchestrationStatus::after_launch(workspaces.len(), sessions.len());

        let state = self
            .store
            .attach(&session_id, workspaces, sessions, outcomes, status)
            .await?;

        let report = BatchReport {
            session_id,
            status: state.status,
            outcomes: state.outcomes,
        };
        info!(
            session_id = %report.session_id,
            status = %report.status,
            failed = report.count(TaskOutcome::is_failure),
            "Orchestration finished"
        );
        Ok(report)
    }

    /// Every check that must pass before anything is written.
    fn preflight(&self, batch: &TaskBatch) -> Result<()> {
        self.launcher.coordinator().ensure_repository()?;
        batch.validate()?;

        let mut names: HashMap<String, &str> = HashMap::new();
        for task in &batch.tasks {
            let name = session_name(&task.key);
            if let Some(other) = names.insert(name.clone(), &task.key) {
                return Err(OrchestratorError::Conflict(format!(
                    "tasks '{}' and '{}' map to the same session name '{}'",
                    other, task.key, name
                )));
            }
        }
        Ok(())
    }
}

/// Log the failure and keep any workspace it left behind in the run's state.
fn record_failure(
    task_key: String,
    failure: LaunchFailure,
    workspaces: &mut Vec<Workspace>,
) -> TaskOutcome {
    error!(task_key = %task_key, stage = ?failure.stage, "Task failed: {}", failure.error);
    if let Some(workspace) = failure.workspace {
        workspaces.push(workspace);
    }
    TaskOutcome::Failed {
        task_key,
        stage: failure.stage,
        error: failure.error.to_string(),
    }
}
