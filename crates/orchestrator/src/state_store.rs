//! Orchestration State Store
//!
//! One JSON document per run under the coordination directory:
//! ```text
//! .fleet/runs/
//! ├── orchestration-<session-id>.json            # live run
//! └── orchestration-<session-id>.json.archived   # cleaned up, kept for history
//! ```
//!
//! Every write is a read-modify-write under one lock per store, committed with
//! an atomic replace.

use chrono::Utc;
use fleet_core::TaskDescriptor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vcs::Workspace;

use crate::error::{OrchestratorError, Result};
use crate::paths::{write_atomic, CoordinationDir};
use crate::state::{OrchestrationState, OrchestrationStatus, SessionRecord, TaskOutcome};

const DOCUMENT_PREFIX: &str = "orchestration-";
const DOCUMENT_SUFFIX: &str = ".json";
const ARCHIVED_SUFFIX: &str = ".archived";

/// Globally unique for a run: UTC timestamp down to milliseconds plus the pid.
pub fn generate_session_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%d-%H%M%S-%3f"),
        std::process::id()
    )
}

#[derive(Debug, Clone)]
pub struct StateStore {
    runs_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn for_coordination(dir: &CoordinationDir) -> Self {
        Self::new(dir.runs_dir())
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn document_path(&self, session_id: &str) -> PathBuf {
        self.runs_dir
            .join(format!("{}{}{}", DOCUMENT_PREFIX, session_id, DOCUMENT_SUFFIX))
    }

    pub fn archived_path(&self, session_id: &str) -> PathBuf {
        let mut name = self.document_path(session_id).into_os_string();
        name.push(ARCHIVED_SUFFIX);
        PathBuf::from(name)
    }

    /// Record a new run in `planning` status.
    pub async fn create(
        &self,
        session_id: &str,
        repo_root: &Path,
        tasks: Vec<TaskDescriptor>,
    ) -> Result<OrchestrationState> {
        let _guard = self.write_lock.lock().await;

        let path = self.document_path(session_id);
        if path.exists() || self.archived_path(session_id).exists() {
            return Err(OrchestratorError::Conflict(format!(
                "orchestration {} already exists",
                session_id
            )));
        }

        let state = OrchestrationState::new(session_id, repo_root, tasks);
        self.write(&state).await?;
        info!(session_id = %session_id, tasks = state.tasks.len(), "Created orchestration");
        Ok(state)
    }

    /// Record the outcome of the provisioning/launch loop.
    pub async fn attach(
        &self,
        session_id: &str,
        workspaces: Vec<Workspace>,
        sessions: Vec<SessionRecord>,
        outcomes: Vec<TaskOutcome>,
        status: OrchestrationStatus,
    ) -> Result<OrchestrationState> {
        self.update(session_id, |state| {
            state.workspaces = workspaces;
            state.sessions = sessions;
            state.outcomes = outcomes;
            state.status = status;
        })
        .await
    }

    pub async fn set_status(
        &self,
        session_id: &str,
        status: OrchestrationStatus,
    ) -> Result<OrchestrationState> {
        self.update(session_id, |state| state.status = status).await
    }

    pub async fn read(&self, session_id: &str) -> Result<OrchestrationState> {
        let path = self.document_path(session_id);
        if !path.exists() {
            return Err(OrchestratorError::NotFound(format!(
                "orchestration {}",
                session_id
            )));
        }
        read_document(&path).await
    }

    /// All non-archived runs, oldest first. Empty when no run was ever recorded.
    pub async fn list(&self) -> Result<Vec<OrchestrationState>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut states = Vec::new();
        let mut entries = fs::read_dir(&self.runs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(DOCUMENT_PREFIX) || !name.ends_with(DOCUMENT_SUFFIX) {
                continue;
            }

            match read_document(&entry.path()).await {
                Ok(state) => states.push(state),
                Err(e) => warn!("Skipping unreadable orchestration {}: {}", name, e),
            }
        }

        states.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        debug!("Listed {} orchestration(s)", states.len());
        Ok(states)
    }

    /// The live run other than `except` whose state still references the
    /// workspace or session of `task_key`.
    pub async fn claimant(&self, task_key: &str, except: &str) -> Result<Option<String>> {
        let owner = self.list().await?.into_iter().find(|state| {
            state.session_id != except
                && (state.workspace_for(task_key).is_some()
                    || state.session_for(task_key).is_some())
        });
        Ok(owner.map(|state| state.session_id))
    }

    /// Mark the run archived and rename its document. Returns the archived path.
    pub async fn archive(&self, session_id: &str) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;

        let path = self.document_path(session_id);
        if !path.exists() {
            return Err(OrchestratorError::NotFound(format!(
                "orchestration {}",
                session_id
            )));
        }

        let mut state = read_document(&path).await?;
        state.status = OrchestrationStatus::Archived;
        state.updated_at = Utc::now();
        self.write(&state).await?;

        let archived = self.archived_path(session_id);
        fs::rename(&path, &archived).await?;
        info!(session_id = %session_id, "Archived orchestration to {}", archived.display());
        Ok(archived)
    }

    async fn update<F>(&self, session_id: &str, mutate: F) -> Result<OrchestrationState>
    where
        F: FnOnce(&mut OrchestrationState),
    {
        let _guard = self.write_lock.lock().await;

        let mut state = self.read(session_id).await?;
        mutate(&mut state);
        state.updated_at = Utc::now();
        self.write(&state).await?;
        debug!(session_id = %session_id, status = %state.status, "Updated orchestration");
        Ok(state)
    }

    async fn write(&self, state: &OrchestrationState) -> Result<()> {
        let content = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.document_path(&state.session_id), &content).await
    }
}

async fn read_document(path: &Path) -> Result<OrchestrationState> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| {
        OrchestratorError::Serialization(format!("{}: {}", path.display(), e))
    })
}
