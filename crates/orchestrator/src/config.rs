//! Project configuration (`.fleet/config.toml`) and the per-task
//! configuration threaded through to specialists.

use fleet_core::BranchPattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use vcs::WorkspaceMode;

use crate::error::{OrchestratorError, Result};
use crate::session::BackendChoice;

const DEFAULT_AGENT_COMMAND: &str = "claude";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub workspace: WorkspaceSettings,
    pub session: SessionSettings,
    pub task_overrides: TaskConfigOverrides,
}

impl FleetConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Relative paths resolve against the repository root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    pub mode: WorkspaceMode,
    pub branch_pattern: BranchPattern,
}

impl WorkspaceSettings {
    /// Defaults to a `<repo-name>-fleet` directory next to the repository.
    pub fn base_dir_for(&self, repo_root: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo_root.join(dir),
            None => {
                let name = repo_root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "repo".to_string());
                repo_root
                    .parent()
                    .unwrap_or(repo_root)
                    .join(format!("{}-fleet", name))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub backend: BackendChoice,
    /// Specialist launcher. `{prompt}` is replaced by the shell-quoted
    /// instruction; without it the instruction is appended as the last argument.
    pub agent_command: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
        }
    }
}

/// Flags handed to specialists. The orchestrator threads these through
/// without acting on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub require_tests: bool,
    pub secret_scan: bool,
    pub post_status_updates: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_job_minutes: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            require_tests: true,
            secret_scan: true,
            post_status_updates: false,
            max_job_minutes: None,
            extra: BTreeMap::new(),
        }
    }
}

impl ResolvedConfig {
    /// Built-in defaults, then caller defaults, then project overrides.
    pub fn resolve(caller: &TaskConfigOverrides, project: &TaskConfigOverrides) -> Self {
        project.apply_to(caller.apply_to(Self::default()))
    }
}

/// One layer of partial task configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_tests: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_scan: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_status_updates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_job_minutes: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TaskConfigOverrides {
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(map.clone()))
            .map_err(|e| OrchestratorError::Validation(format!("invalid task config: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.require_tests.is_none()
            && self.secret_scan.is_none()
            && self.post_status_updates.is_none()
            && self.max_job_minutes.is_none()
            && self.extra.is_empty()
    }

    pub fn apply_to(&self, mut base: ResolvedConfig) -> ResolvedConfig {
        if let Some(v) = self.require_tests {
            base.require_tests = v;
        }
        if let Some(v) = self.secret_scan {
            base.secret_scan = v;
        }
        if let Some(v) = self.post_status_updates {
            base.post_status_updates = v;
        }
        if let Some(v) = self.max_job_minutes {
            base.max_job_minutes = Some(v);
        }
        for (key, value) in &self.extra {
            base.extra.insert(key.clone(), value.clone());
        }
        base
    }
}
