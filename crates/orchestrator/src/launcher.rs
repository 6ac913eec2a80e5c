//! Session Launcher: one fire-and-forget session per task, started inside the
//! task's workspace with a context artifact to read.

use chrono::Utc;
use fleet_core::TaskDescriptor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use vcs::Workspace;

use crate::artifacts::{status_path, TaskContext};
use crate::config::TaskConfigOverrides;
use crate::coordinator::{Coordinator, WorkspacePlan};
use crate::error::{OrchestratorError, Result};
use crate::paths::CoordinationDir;
use crate::session::{session_name, SessionBackend};
use crate::state::{FailureStage, SessionRecord};
use crate::state_store::StateStore;

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const CONTEXT_PLACEHOLDER: &str = "{context}";

/// A provisioned workspace with its context artifact written.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub plan: WorkspacePlan,
    pub context_path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    Launched {
        prepared: PreparedTask,
        session: SessionRecord,
    },
    /// A live session with the same name exists; nothing was touched.
    AlreadyRunning { session: String },
}

/// A task that did not get a session.
#[derive(Debug)]
pub struct LaunchFailure {
    pub stage: FailureStage,
    /// Present when the workspace was provisioned before the failure.
    pub workspace: Option<Workspace>,
    pub error: OrchestratorError,
}

impl LaunchFailure {
    fn new(stage: FailureStage, error: OrchestratorError) -> Self {
        Self {
            stage,
            workspace: None,
            error,
        }
    }

    fn with_workspace(mut self, workspace: &Workspace) -> Self {
        self.workspace = Some(workspace.clone());
        self
    }
}

pub type LaunchResult<T> = std::result::Result<T, LaunchFailure>;

#[derive(Clone)]
pub struct SessionLauncher {
    coordinator: Coordinator,
    backend: Arc<dyn SessionBackend>,
    agent_command: String,
    coordination: CoordinationDir,
    store: StateStore,
}

impl SessionLauncher {
    pub fn new(
        coordinator: Coordinator,
        backend: Arc<dyn SessionBackend>,
        agent_command: impl Into<String>,
        coordination: CoordinationDir,
        store: StateStore,
    ) -> Self {
        Self {
            coordinator,
            backend,
            agent_command: agent_command.into(),
            coordination,
            store,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    pub fn coordination(&self) -> &CoordinationDir {
        &self.coordination
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Name of a live session already hosting `task`, if any.
    pub async fn running_session(&self, task: &TaskDescriptor) -> Result<Option<String>> {
        let name = session_name(&task.key);
        if self.backend.session_exists(&name).await? {
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    pub async fn write_context(&self, session_id: &str, plan: &WorkspacePlan) -> Result<PathBuf> {
        let lock_registry = self.coordination.lock_registry_path(session_id);
        TaskContext {
            session_id,
            task: &plan.task,
            workspace: &plan.workspace.path,
            mode: plan.workspace.mode,
            branch: plan.branch.as_deref(),
            config: &plan.config,
            lock_registry: &lock_registry,
        }
        .write()
        .await
    }

    /// Provision the workspace and write its context artifact.
    ///
    /// Workspaces and sessions are keyed by task key alone, so a key still
    /// referenced by another live run is refused with `Conflict` until that run
    /// is cleaned up.
    pub async fn prepare(
        &self,
        session_id: &str,
        task: &TaskDescriptor,
        caller_overrides: &TaskConfigOverrides,
    ) -> LaunchResult<PreparedTask> {
        let provision = |e: OrchestratorError| LaunchFailure::new(FailureStage::Provision, e);

        if let Some(owner) = self
            .store
            .claimant(&task.key, session_id)
            .await
            .map_err(provision)?
        {
            return Err(provision(OrchestratorError::Conflict(format!(
                "task '{}' still belongs to orchestration {}; clean it up first",
                task.key, owner
            ))));
        }

        let plan = self
            .coordinator
            .coordinate(task, caller_overrides)
            .await
            .map_err(provision)?;
        let context_path = self.write_context(session_id, &plan).await.map_err(|e| {
            LaunchFailure::new(FailureStage::Context, e).with_workspace(&plan.workspace)
        })?;
        Ok(PreparedTask { plan, context_path })
    }

    /// Start the specialist. Does not wait for it.
    pub async fn start(&self, prepared: &PreparedTask) -> Result<SessionRecord> {
        let plan = &prepared.plan;
        let name = session_name(&plan.task.key);
        let command = self.specialist_command(prepared)?;

        self.backend
            .create_session(&name, &plan.workspace.path)
            .await?;
        if let Err(e) = self.backend.send_command(&name, &command).await {
            if let Err(kill_err) = self.backend.kill_session(&name).await {
                warn!("Failed to discard half-started session {}: {}", name, kill_err);
            }
            return Err(e);
        }

        info!(
            task_key = %plan.task.key,
            session = %name,
            backend = %self.backend.kind(),
            "Launched specialist session"
        );

        Ok(SessionRecord {
            name,
            task_key: plan.task.key.clone(),
            workspace_path: plan.workspace.path.clone(),
            specialist: plan.specialist.clone(),
            backend: self.backend.kind(),
            started_at: Utc::now(),
        })
    }

    /// Skip-check, prepare and start in one step.
    pub async fn launch(
        &self,
        session_id: &str,
        task: &TaskDescriptor,
        caller_overrides: &TaskConfigOverrides,
    ) -> LaunchResult<LaunchOutcome> {
        let running = self
            .running_session(task)
            .await
            .map_err(|e| LaunchFailure::new(FailureStage::Launch, e))?;
        if let Some(session) = running {
            warn!(task_key = %task.key, session = %session, "Session already running, skipping");
            return Ok(LaunchOutcome::AlreadyRunning { session });
        }

        let prepared = self.prepare(session_id, task, caller_overrides).await?;
        let session = self.start(&prepared).await.map_err(|e| {
            LaunchFailure::new(FailureStage::Launch, e).with_workspace(&prepared.plan.workspace)
        })?;
        Ok(LaunchOutcome::Launched { prepared, session })
    }

    fn specialist_command(&self, prepared: &PreparedTask) -> Result<String> {
        let prompt = instruction(prepared);
        let quoted_prompt = quote(&prompt)?;
        let quoted_context = quote(&prepared.context_path.to_string_lossy())?;

        let template = self.agent_command.trim();
        if template.contains(PROMPT_PLACEHOLDER) || template.contains(CONTEXT_PLACEHOLDER) {
            Ok(template
                .replace(PROMPT_PLACEHOLDER, &quoted_prompt)
                .replace(CONTEXT_PLACEHOLDER, &quoted_context))
        } else {
            Ok(format!("{} {}", template, quoted_prompt))
        }
    }
}

fn instruction(prepared: &PreparedTask) -> String {
    let plan = &prepared.plan;
    let mut text = format!(
        "Read {} and complete the task it describes.",
        prepared.context_path.display()
    );
    match &plan.branch {
        Some(branch) => text.push_str(&format!(" Commit your work to branch {}.", branch)),
        None => text.push_str(" This workspace has no version control; leave changes in place."),
    }
    text.push_str(&format!(
        " When done, write your completion status to {}.",
        status_path(&plan.workspace.path).display()
    ));
    text
}

fn quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .map_err(|e| OrchestratorError::Validation(format!("cannot quote '{}': {}", value, e)))
}
