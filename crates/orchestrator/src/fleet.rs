//! Wires the components of one repository together from its configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use vcs::Provisioner;

use crate::config::FleetConfig;
use crate::coordinator::Coordinator;
use crate::error::{OrchestratorError, Result};
use crate::launcher::SessionLauncher;
use crate::lifecycle::LifecycleManager;
use crate::locks::FileLockRegistry;
use crate::paths::{CoordinationDir, COORDINATION_DIR};
use crate::runner::Orchestrator;
use crate::session::{select_backend, SessionBackend};
use crate::state_store::StateStore;

#[derive(Clone)]
pub struct Fleet {
    repo_root: PathBuf,
    config: FleetConfig,
    coordination: CoordinationDir,
    store: StateStore,
    provisioner: Provisioner,
    backend: Arc<dyn SessionBackend>,
}

impl Fleet {
    /// Write a default `config.toml` unless one exists. Returns its path.
    pub async fn init(repo_root: &Path) -> Result<PathBuf> {
        let coordination = CoordinationDir::for_repo(repo_root);
        coordination.ensure().await?;

        let path = coordination.config_path();
        if path.exists() {
            return Err(OrchestratorError::Conflict(format!(
                "{} already exists",
                path.display()
            )));
        }

        tokio::fs::write(&path, FleetConfig::default().to_toml()?).await?;
        info!("Wrote {}", path.display());
        Ok(path)
    }

    /// Load `.fleet/config.toml` of `repo_root`, or defaults when absent.
    pub async fn load_config(repo_root: &Path) -> Result<FleetConfig> {
        FleetConfig::load(&CoordinationDir::for_repo(repo_root).config_path()).await
    }

    /// Open with the session backend selected by `config`.
    pub async fn open(repo_root: &Path, config: FleetConfig) -> Result<Self> {
        let repo_root = absolute(repo_root).await?;
        let coordination = CoordinationDir::for_repo(&repo_root);
        let backend = select_backend(config.session.backend, &coordination)?;
        Ok(Self::assemble(repo_root, config, coordination, backend))
    }

    /// Open with an explicit session backend.
    pub async fn with_backend(
        repo_root: &Path,
        config: FleetConfig,
        backend: Arc<dyn SessionBackend>,
    ) -> Result<Self> {
        let repo_root = absolute(repo_root).await?;
        let coordination = CoordinationDir::for_repo(&repo_root);
        Ok(Self::assemble(repo_root, config, coordination, backend))
    }

    fn assemble(
        repo_root: PathBuf,
        config: FleetConfig,
        coordination: CoordinationDir,
        backend: Arc<dyn SessionBackend>,
    ) -> Self {
        debug!(
            repo_root = %repo_root.display(),
            mode = %config.workspace.mode,
            backend = %backend.kind(),
            "Opening fleet"
        );
        Self {
            store: StateStore::for_coordination(&coordination),
            provisioner: Provisioner::new().with_shadow_excludes(vec![COORDINATION_DIR.to_string()]),
            repo_root,
            config,
            coordination,
            backend,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn coordination(&self) -> &CoordinationDir {
        &self.coordination
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config.workspace.base_dir_for(&self.repo_root)
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.provisioner.clone(),
            &self.repo_root,
            self.base_dir(),
            self.config.workspace.mode,
            self.config.workspace.branch_pattern.clone(),
        )
        .with_project_overrides(self.config.task_overrides.clone())
    }

    pub fn launcher(&self) -> SessionLauncher {
        SessionLauncher::new(
            self.coordinator(),
            Arc::clone(&self.backend),
            self.config.session.agent_command.clone(),
            self.coordination.clone(),
            self.store.clone(),
        )
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.launcher())
    }

    pub fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(
            self.store.clone(),
            self.provisioner.clone(),
            Arc::clone(&self.backend),
            self.coordination.clone(),
        )
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn locks(&self, session_id: &str) -> FileLockRegistry {
        FileLockRegistry::new(self.coordination.lock_registry_path(session_id))
    }
}

async fn absolute(path: &Path) -> Result<PathBuf> {
    match tokio::fs::canonicalize(path).await {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OrchestratorError::Validation(
            format!("{} does not exist", path.display()),
        )),
        Err(e) => Err(e.into()),
    }
}
