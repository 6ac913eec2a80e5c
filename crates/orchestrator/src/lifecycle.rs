//! Session Lifecycle Manager: inspects and tears down whole runs, using the
//! State Store as the only record of what belongs to a run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use vcs::{Provisioner, RemoveOutcome};

use crate::artifacts::{read_completion_status, CompletionRead};
use crate::error::{OrchestratorError, Result};
use crate::paths::CoordinationDir;
use crate::session::{backend_for_kind, SessionBackend};
use crate::state::{OrchestrationState, OrchestrationStatus, SessionRecord, TaskOutcome};
use crate::state_store::StateStore;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub session_id: String,
    pub status: OrchestrationStatus,
    pub created_at: DateTime<Utc>,
    pub tasks: usize,
    pub workspaces: usize,
    pub sessions: usize,
    pub live_sessions: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    pub task_key: String,
    pub workspace: Option<PathBuf>,
    pub session: Option<String>,
    pub alive: bool,
    pub outcome: Option<TaskOutcome>,
    pub completion: CompletionRead,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatusReport {
    pub session_id: String,
    pub status: OrchestrationStatus,
    pub tasks: Vec<TaskStatusReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub resource: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub session_id: String,
    pub sessions_killed: Vec<String>,
    /// Referenced by the run but already gone.
    pub sessions_missing: Vec<String>,
    pub workspaces_removed: Vec<PathBuf>,
    pub workspaces_missing: Vec<PathBuf>,
    pub failures: Vec<ResourceFailure>,
    /// Set once the state document has been archived.
    pub archived_to: Option<PathBuf>,
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: StateStore,
    provisioner: Provisioner,
    backend: Arc<dyn SessionBackend>,
    coordination: CoordinationDir,
}

impl LifecycleManager {
    pub fn new(
        store: StateStore,
        provisioner: Provisioner,
        backend: Arc<dyn SessionBackend>,
        coordination: CoordinationDir,
    ) -> Self {
        Self {
            store,
            provisioner,
            backend,
            coordination,
        }
    }

    /// Sessions are driven by the backend that created them, which may differ
    /// from the currently configured one.
    fn backend_for(&self, session: &SessionRecord) -> Arc<dyn SessionBackend> {
        if session.backend == self.backend.kind() {
            Arc::clone(&self.backend)
        } else {
            backend_for_kind(session.backend, &self.coordination)
        }
    }

    async fn is_alive(&self, session: &SessionRecord) -> bool {
        match self.backend_for(session).session_exists(&session.name).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(session = %session.name, "Liveness check failed: {}", e);
                false
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        for state in self.store.list().await? {
            let mut live_sessions = 0;
            for session in &state.sessions {
                if self.is_alive(session).await {
                    live_sessions += 1;
                }
            }
            summaries.push(RunSummary {
                session_id: state.session_id.clone(),
                status: state.status,
                created_at: state.created_at,
                tasks: state.tasks.len(),
                workspaces: state.workspaces.len(),
                sessions: state.sessions.len(),
                live_sessions,
                failures: state.failures().count(),
            });
        }
        Ok(summaries)
    }

    pub async fn show(&self, session_id: &str) -> Result<OrchestrationState> {
        self.store.read(session_id).await
    }

    /// Per-task liveness and completion status. Moves a `running` run to
    /// `done` once none of its sessions is alive.
    pub async fn status(&self, session_id: &str) -> Result<RunStatusReport> {
        let state = self.store.read(session_id).await?;

        let mut tasks = Vec::with_capacity(state.tasks.len());
        let mut any_alive = false;
        for task in &state.tasks {
            let workspace = state.workspace_for(&task.key);
            let session = state.session_for(&task.key);

            let alive = match session {
                Some(session) => self.is_alive(session).await,
                None => false,
            };
            any_alive |= alive;

            let completion = match workspace {
                Some(ws) => read_completion_status(&ws.path).await,
                None => CompletionRead::Missing,
            };

            tasks.push(TaskStatusReport {
                task_key: task.key.clone(),
                workspace: workspace.map(|w| w.path.clone()),
                session: session.map(|s| s.name.clone()),
                alive,
                outcome: state
                    .outcomes
                    .iter()
                    .find(|o| o.task_key() == task.key)
                    .cloned(),
                completion,
            });
        }

        let mut status = state.status;
        if status == OrchestrationStatus::Running && !any_alive {
            status = self
                .store
                .set_status(session_id, OrchestrationStatus::Done)
                .await?
                .status;
            info!(session_id = %session_id, "All sessions finished, run is done");
        }

        Ok(RunStatusReport {
            session_id: state.session_id,
            status,
            tasks,
        })
    }

    /// Kill every session and remove every workspace of a run, then archive
    /// its state. Each resource is attempted even when an earlier one fails;
    /// any failure leaves the run unarchived so cleanup can be retried.
    pub async fn cleanup(&self, session_id: &str) -> Result<CleanupReport> {
        let state = self.store.read(session_id).await?;
        let mut report = CleanupReport {
            session_id: session_id.to_string(),
            ..Default::default()
        };

        for session in &state.sessions {
            match self.backend_for(session).kill_session(&session.name).await {
                Ok(true) => {
                    info!(session = %session.name, "Killed session");
                    report.sessions_killed.push(session.name.clone());
                }
                Ok(false) => {
                    warn!(session = %session.name, "Session already gone");
                    report.sessions_missing.push(session.name.clone());
                }
                Err(e) => {
                    warn!(session = %session.name, "Failed to kill session: {}", e);
                    report.failures.push(ResourceFailure {
                        resource: format!("session {}", session.name),
                        error: e.to_string(),
                    });
                }
            }
        }

        for workspace in &state.workspaces {
            match self.provisioner.remove(&state.repo_root, workspace).await {
                Ok(RemoveOutcome::Removed) => {
                    report.workspaces_removed.push(workspace.path.clone());
                }
                Ok(RemoveOutcome::AlreadyGone) => {
                    warn!(task_key = %workspace.task_key, "Workspace already removed");
                    report.workspaces_missing.push(workspace.path.clone());
                }
                Err(e) => {
                    warn!(task_key = %workspace.task_key, "Failed to remove workspace: {}", e);
                    report.failures.push(ResourceFailure {
                        resource: format!("workspace {}", workspace.path.display()),
                        error: e.to_string(),
                    });
                }
            }
        }

        let lock_registry = self.coordination.lock_registry_path(session_id);
        if lock_registry.exists() {
            if let Err(e) = fs::remove_file(&lock_registry).await {
                report.failures.push(ResourceFailure {
                    resource: format!("lock registry {}", lock_registry.display()),
                    error: e.to_string(),
                });
            }
        }

        if !report.failures.is_empty() {
            return Err(OrchestratorError::CleanupPartialFailure {
                session_id: session_id.to_string(),
                report: Box::new(report),
            });
        }

        report.archived_to = Some(self.store.archive(session_id).await?);
        info!(
            session_id = %session_id,
            sessions = report.sessions_killed.len(),
            workspaces = report.workspaces_removed.len(),
            "Cleanup complete"
        );
        Ok(report)
    }
}
