use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

use super::backend::{BackendKind, SessionBackend};

/// Sessions hosted by a detached tmux server.
#[derive(Debug, Clone, Default)]
pub struct TmuxBackend;

impl TmuxBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run_tmux(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!("Running tmux {:?}", args);
        Command::new("tmux").args(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrchestratorError::Session("tmux is not installed".to_string())
            } else {
                OrchestratorError::Io(e)
            }
        })
    }
}

/// `=name` makes tmux match the session name exactly instead of by prefix.
fn exact_target(name: &str) -> String {
    format!("={}", name)
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tmux
    }

    async fn create_session(&self, name: &str, cwd: &Path) -> Result<()> {
        let cwd = cwd.to_string_lossy();
        let output = self
            .run_tmux(&["new-session", "-d", "-s", name, "-c", &cwd])
            .await?;

        if !output.status.success() {
            return Err(OrchestratorError::creation_failed(
                format!("tmux new-session -d -s {} -c {}", name, cwd),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(())
    }

    async fn send_command(&self, name: &str, command: &str) -> Result<()> {
        let output = self
            .run_tmux(&["send-keys", "-t", name, command, "Enter"])
            .await?;

        if !output.status.success() {
            return Err(OrchestratorError::creation_failed(
                format!("tmux send-keys -t {}", name),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(())
    }

    async fn session_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .run_tmux(&["has-session", "-t", &exact_target(name)])
            .await?;
        Ok(output.status.success())
    }

    async fn kill_session(&self, name: &str) -> Result<bool> {
        if !self.session_exists(name).await? {
            return Ok(false);
        }

        let output = self
            .run_tmux(&["kill-session", "-t", &exact_target(name)])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("tmux kill-session {} failed: {}", name, stderr.trim());
            return Err(OrchestratorError::Session(format!(
                "failed to kill tmux session {}: {}",
                name,
                stderr.trim()
            )));
        }
        Ok(true)
    }
}
