use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::VcsError;

/// Isolation strategy for a task workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceMode {
    /// A `git worktree` sharing the repository's object store. Branch
    /// references are visible from every worktree of the same repository.
    #[default]
    IsolatedWorktree,
    /// An independent local clone with its own repository metadata.
    FullClone,
    /// A plain file copy without any version-control metadata. Changes are
    /// not tracked and cannot be committed to a branch; this is the weakest
    /// isolation mode.
    ShadowCopy,
}

impl WorkspaceMode {
    pub const ALL: [WorkspaceMode; 3] = [
        WorkspaceMode::IsolatedWorktree,
        WorkspaceMode::FullClone,
        WorkspaceMode::ShadowCopy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsolatedWorktree => "isolated-worktree",
            Self::FullClone => "full-clone",
            Self::ShadowCopy => "shadow-copy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "isolated-worktree" | "worktree" => Some(Self::IsolatedWorktree),
            "full-clone" | "clone" => Some(Self::FullClone),
            "shadow-copy" | "copy" => Some(Self::ShadowCopy),
            _ => None,
        }
    }

    /// Whether workspaces in this mode are checked out on a task branch.
    pub fn tracks_branch(&self) -> bool {
        match self {
            Self::IsolatedWorktree | Self::FullClone => true,
            Self::ShadowCopy => false,
        }
    }
}

impl fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceMode {
    type Err = VcsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| VcsError::UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub task_key: String,
    pub path: PathBuf,
    pub mode: WorkspaceMode,
    /// Only set for modes that track a branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(
        task_key: impl Into<String>,
        path: PathBuf,
        mode: WorkspaceMode,
        branch: Option<String>,
    ) -> Self {
        Self {
            task_key: task_key.into(),
            path,
            mode,
            branch: branch.filter(|_| mode.tracks_branch()),
            created_at: Utc::now(),
        }
    }
}
