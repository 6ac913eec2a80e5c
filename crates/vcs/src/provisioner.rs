use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, VcsError};
use crate::git::GitVcs;
use crate::shadow::{shadow_copy, CopyMethod};
use crate::traits::{Workspace, WorkspaceMode};

/// Workspaces always live at `base_dir/task_key`, whatever the mode.
pub fn workspace_path(base_dir: &Path, task_key: &str) -> PathBuf {
    base_dir.join(task_key)
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub repo_root: PathBuf,
    /// Relative paths are resolved against `repo_root`.
    pub base_dir: PathBuf,
    pub branch: String,
    pub task_key: String,
    pub mode: WorkspaceMode,
}

impl ProvisionRequest {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        branch: impl Into<String>,
        task_key: impl Into<String>,
        mode: WorkspaceMode,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            base_dir: base_dir.into(),
            branch: branch.into(),
            task_key: task_key.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Nothing was left at the workspace path.
    AlreadyGone,
}

/// Creates and destroys per-task workspaces.
///
/// Provisioning is idempotent per task key: whatever sits at the workspace
/// path is torn down first, so provisioning the same key twice yields one
/// clean workspace at the same path.
#[derive(Debug, Clone, Default)]
pub struct Provisioner {
    shadow_excludes: Vec<String>,
}

impl Provisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level names left out of shadow copies, in addition to `.git`.
    pub fn with_shadow_excludes(mut self, excludes: Vec<String>) -> Self {
        self.shadow_excludes = excludes;
        self
    }

    pub async fn provision(&self, request: &ProvisionRequest) -> Result<Workspace> {
        let git = GitVcs::new(&request.repo_root);
        if !git.is_repository() {
            return Err(VcsError::NotARepository(request.repo_root.clone()));
        }

        let repo_root = tokio::fs::canonicalize(&request.repo_root).await?;
        let git = GitVcs::new(&repo_root);
        let base_dir = resolve_base_dir(&repo_root, &request.base_dir);
        let path = workspace_path(&base_dir, &request.task_key);

        info!(
            task_key = %request.task_key,
            mode = %request.mode,
            path = %path.display(),
            "Provisioning workspace"
        );

        tokio::fs::create_dir_all(&base_dir).await?;

        match request.mode {
            WorkspaceMode::IsolatedWorktree => {
                if path.exists() {
                    debug!("Replacing existing worktree at {:?}", path);
                    git.remove_worktree(&path).await?;
                } else if let Err(e) = git.prune_worktrees().await {
                    warn!("git worktree prune failed: {}", e);
                }
                git.add_worktree(&path, &request.branch).await?;
                verify_branch(&git, &path, &request.branch).await?;
            }
            WorkspaceMode::FullClone => {
                remove_dir_if_exists(&path).await?;
                git.clone_into(&path).await?;
                git.checkout_branch(&path, &request.branch).await?;
                verify_branch(&git, &path, &request.branch).await?;
            }
            WorkspaceMode::ShadowCopy => {
                remove_dir_if_exists(&path).await?;
                tokio::fs::create_dir_all(&path).await?;
                let excludes = self.shadow_excludes_for(&repo_root, &base_dir);
                let method = shadow_copy(&repo_root, &path, &excludes).await?;
                debug!(
                    task_key = %request.task_key,
                    rsync = method == CopyMethod::Rsync,
                    "Shadow copy complete"
                );
            }
        }

        info!(task_key = %request.task_key, "Workspace ready at {:?}", path);
        Ok(Workspace::new(
            request.task_key.clone(),
            path,
            request.mode,
            Some(request.branch.clone()),
        ))
    }

    /// Tear a workspace down the way its mode requires. Worktrees are
    /// deregistered from the owning repository; branches are kept.
    pub async fn remove(&self, repo_root: &Path, workspace: &Workspace) -> Result<RemoveOutcome> {
        let existed = workspace.path.exists();

        match workspace.mode {
            WorkspaceMode::IsolatedWorktree => {
                let git = GitVcs::new(repo_root);
                if existed {
                    git.remove_worktree(&workspace.path).await?;
                } else if let Err(e) = git.prune_worktrees().await {
                    warn!("git worktree prune failed: {}", e);
                }
            }
            WorkspaceMode::FullClone | WorkspaceMode::ShadowCopy => {
                remove_dir_if_exists(&workspace.path).await?;
            }
        }

        if existed {
            info!(task_key = %workspace.task_key, "Removed workspace {:?}", workspace.path);
            Ok(RemoveOutcome::Removed)
        } else {
            Ok(RemoveOutcome::AlreadyGone)
        }
    }

    /// Keep shadow copies from recursing into a base dir that lives inside the
    /// repository.
    fn shadow_excludes_for(&self, repo_root: &Path, base_dir: &Path) -> Vec<String> {
        let mut excludes = self.shadow_excludes.clone();
        if let Ok(relative) = base_dir.strip_prefix(repo_root) {
            if let Some(Component::Normal(first)) = relative.components().next() {
                let name = first.to_string_lossy().into_owned();
                if !excludes.contains(&name) {
                    excludes.push(name);
                }
            }
        }
        excludes
    }
}

fn resolve_base_dir(repo_root: &Path, base_dir: &Path) -> PathBuf {
    let joined = if base_dir.is_absolute() {
        base_dir.to_path_buf()
    } else {
        repo_root.join(base_dir)
    };

    // Lexical only: the base dir may not exist yet.
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        debug!("Removing existing directory {:?}", path);
        tokio::fs::remove_dir_all(path).await?;
    }
    Ok(())
}

async fn verify_branch(git: &GitVcs, path: &Path, expected: &str) -> Result<()> {
    let actual = git.current_branch(path).await?;
    if actual != expected {
        return Err(VcsError::CommandFailed {
            command: "git rev-parse --abbrev-ref HEAD".to_string(),
            diagnostics: format!("expected branch '{}', found '{}'", expected, actual),
        });
    }
    Ok(())
}
