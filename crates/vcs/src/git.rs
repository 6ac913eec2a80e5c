use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, VcsError};

pub(crate) fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| VcsError::InvalidPath(path.display().to_string()))
}

/// Thin wrapper over the `git` binary, rooted at one repository.
#[derive(Debug, Clone)]
pub struct GitVcs {
    repo_path: PathBuf,
}

impl GitVcs {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// `.git` is a directory for a primary checkout and a file for worktrees.
    pub fn is_repository(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    pub async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<String> {
        debug!("Running git {:?} in {:?}", args, cwd);

        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => VcsError::CommandNotFound("git".to_string()),
                _ => VcsError::Io(e),
            })?;

        if !output.status.success() {
            return Err(VcsError::command_failed(
                format!("git {}", args.join(" ")),
                &output.stderr,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Create (or reset) `branch` at the current tip and check it out in a new
    /// worktree at `path`.
    pub async fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        self.run_git(
            &["worktree", "add", "-B", branch, path_str(path)?, "HEAD"],
            &self.repo_path,
        )
        .await?;
        Ok(())
    }

    /// Deregister a worktree and delete its directory. Tolerates a worktree
    /// that git no longer knows about.
    pub async fn remove_worktree(&self, path: &Path) -> Result<()> {
        if let Err(e) = self
            .run_git(
                &["worktree", "remove", "--force", path_str(path)?],
                &self.repo_path,
            )
            .await
        {
            warn!("git worktree remove failed for {:?}: {}", path, e);
        }

        if path.exists() {
            tokio::fs::remove_dir_all(path).await?;
        }

        if let Err(e) = self.prune_worktrees().await {
            warn!("git worktree prune failed: {}", e);
        }
        Ok(())
    }

    pub async fn prune_worktrees(&self) -> Result<()> {
        self.run_git(&["worktree", "prune"], &self.repo_path)
            .await?;
        Ok(())
    }

    pub async fn clone_into(&self, path: &Path) -> Result<()> {
        self.run_git(
            &["clone", "--local", path_str(&self.repo_path)?, path_str(path)?],
            &self.repo_path,
        )
        .await?;
        Ok(())
    }

    pub async fn checkout_branch(&self, cwd: &Path, branch: &str) -> Result<()> {
        self.run_git(&["checkout", "-B", branch], cwd).await?;
        Ok(())
    }

    pub async fn current_branch(&self, cwd: &Path) -> Result<String> {
        let output = self
            .run_git(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)
            .await?;
        Ok(output.trim().to_string())
    }
}
