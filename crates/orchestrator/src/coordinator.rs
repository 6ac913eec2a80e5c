//! Task-to-Workspace Coordinator: task descriptor in, provisioned workspace,
//! branch and resolved configuration out.

use fleet_core::{BranchPattern, TaskDescriptor};
use std::path::{Path, PathBuf};
use tracing::info;
use vcs::{ProvisionRequest, Provisioner, Workspace, WorkspaceMode};

use crate::config::{ResolvedConfig, TaskConfigOverrides};
use crate::error::{OrchestratorError, Result};

/// Everything the launcher needs, so it never re-derives coordination state.
#[derive(Debug, Clone)]
pub struct WorkspacePlan {
    pub workspace: Workspace,
    /// `None` for shadow copies, which have no branch.
    pub branch: Option<String>,
    pub specialist: String,
    pub task: TaskDescriptor,
    pub config: ResolvedConfig,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    provisioner: Provisioner,
    repo_root: PathBuf,
    base_dir: PathBuf,
    mode: WorkspaceMode,
    pattern: BranchPattern,
    project_overrides: TaskConfigOverrides,
}

impl Coordinator {
    pub fn new(
        provisioner: Provisioner,
        repo_root: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        mode: WorkspaceMode,
        pattern: BranchPattern,
    ) -> Self {
        Self {
            provisioner,
            repo_root: repo_root.into(),
            base_dir: base_dir.into(),
            mode,
            pattern,
            project_overrides: TaskConfigOverrides::default(),
        }
    }

    pub fn with_project_overrides(mut self, overrides: TaskConfigOverrides) -> Self {
        self.project_overrides = overrides;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn mode(&self) -> WorkspaceMode {
        self.mode
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Deterministic for a given task and pattern.
    pub fn branch_for(&self, task: &TaskDescriptor) -> String {
        self.pattern.render(task)
    }

    /// Fails with `Validation` unless the repository root is version-controlled.
    pub fn ensure_repository(&self) -> Result<()> {
        if !self.repo_root.join(".git").exists() {
            return Err(OrchestratorError::Validation(format!(
                "{} is not a version-controlled repository",
                self.repo_root.display()
            )));
        }
        Ok(())
    }

    pub async fn coordinate(
        &self,
        task: &TaskDescriptor,
        caller_overrides: &TaskConfigOverrides,
    ) -> Result<WorkspacePlan> {
        let branch = self.branch_for(task);
        let request = ProvisionRequest::new(
            &self.repo_root,
            &self.base_dir,
            branch.clone(),
            task.key.clone(),
            self.mode,
        );

        let workspace = self.provisioner.provision(&request).await?;
        let config = ResolvedConfig::resolve(caller_overrides, &self.project_overrides);

        info!(
            task_key = %task.key,
            branch = %branch,
            specialist = %task.specialist,
            "Coordinated workspace"
        );

        Ok(WorkspacePlan {
            branch: workspace.branch.clone(),
            workspace,
            specialist: task.specialist.clone(),
            task: task.clone(),
            config,
        })
    }
}
