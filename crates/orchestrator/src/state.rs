//! Durable record of one orchestration run.

use chrono::{DateTime, Utc};
use fleet_core::TaskDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use vcs::Workspace;

use crate::session::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    Planning,
    Ready,
    Running,
    Done,
    Archived,
}

impl OrchestrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationStatus::Planning => "planning",
            OrchestrationStatus::Ready => "ready",
            OrchestrationStatus::Running => "running",
            OrchestrationStatus::Done => "done",
            OrchestrationStatus::Archived => "archived",
        }
    }

    /// Status of a run once its provisioning/launch loop has finished.
    pub fn after_launch(workspaces: usize, sessions: usize) -> Self {
        if sessions > 0 {
            OrchestrationStatus::Running
        } else if workspaces > 0 {
            OrchestrationStatus::Ready
        } else {
            OrchestrationStatus::Done
        }
    }
}

impl fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A launched session as referenced by its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub task_key: String,
    pub workspace_path: PathBuf,
    pub specialist: String,
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
}

/// Step of the per-task pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Provision,
    Context,
    Launch,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Provision => "provision",
            FailureStage::Context => "context",
            FailureStage::Launch => "launch",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Launched { task_key: String, session: String },
    /// Workspace and context are in place; no session was requested.
    Provisioned { task_key: String },
    /// A live session with the same name already existed.
    Skipped { task_key: String, session: String },
    Failed {
        task_key: String,
        stage: FailureStage,
        error: String,
    },
}

impl TaskOutcome {
    pub fn task_key(&self) -> &str {
        match self {
            TaskOutcome::Launched { task_key, .. }
            | TaskOutcome::Provisioned { task_key }
            | TaskOutcome::Skipped { task_key, .. }
            | TaskOutcome::Failed { task_key, .. } => task_key,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub session_id: String,
    pub status: OrchestrationStatus,
    pub repo_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<TaskDescriptor>,
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub outcomes: Vec<TaskOutcome>,
}

impl OrchestrationState {
    pub fn new(
        session_id: impl Into<String>,
        repo_root: impl Into<PathBuf>,
        tasks: Vec<TaskDescriptor>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            status: OrchestrationStatus::Planning,
            repo_root: repo_root.into(),
            created_at: now,
            updated_at: now,
            tasks,
            workspaces: Vec::new(),
            sessions: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn workspace_for(&self, task_key: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.task_key == task_key)
    }

    pub fn session_for(&self, task_key: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.task_key == task_key)
    }

    pub fn settled_status(&self) -> OrchestrationStatus {
        OrchestrationStatus::after_launch(self.workspaces.len(), self.sessions.len())
    }
}
