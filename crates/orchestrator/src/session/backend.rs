use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::paths::CoordinationDir;

use super::process::ProcessBackend;
use super::tmux::TmuxBackend;

const SESSION_PREFIX: &str = "fleet-";

/// Session names are derived 1:1 from task keys.
pub fn session_name(task_key: &str) -> String {
    let sanitized: String = task_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}{}", SESSION_PREFIX, sanitized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tmux,
    Process,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tmux => "tmux",
            BackendKind::Process => "process",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// tmux when it is on `PATH`, background processes otherwise.
    #[default]
    Auto,
    Tmux,
    Process,
}

impl BackendChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "tmux" => Some(Self::Tmux),
            "process" => Some(Self::Process),
            _ => None,
        }
    }
}

impl FromStr for BackendChoice {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            OrchestratorError::Config(format!(
                "unknown session backend '{}', expected auto, tmux or process",
                s
            ))
        })
    }
}

/// Capability interface over whatever hosts specialist sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Start an empty session rooted at `cwd`.
    async fn create_session(&self, name: &str, cwd: &Path) -> Result<()>;

    /// Run `command` inside an existing session.
    async fn send_command(&self, name: &str, command: &str) -> Result<()>;

    async fn session_exists(&self, name: &str) -> Result<bool>;

    /// Returns `false` when there was nothing to kill.
    async fn kill_session(&self, name: &str) -> Result<bool>;
}

pub fn select_backend(
    choice: BackendChoice,
    coordination: &CoordinationDir,
) -> Result<Arc<dyn SessionBackend>> {
    let kind = match choice {
        BackendChoice::Tmux => {
            if which::which("tmux").is_err() {
                return Err(OrchestratorError::Config(
                    "session backend 'tmux' requested but tmux is not on PATH".to_string(),
                ));
            }
            BackendKind::Tmux
        }
        BackendChoice::Process => BackendKind::Process,
        BackendChoice::Auto => {
            if which::which("tmux").is_ok() {
                BackendKind::Tmux
            } else {
                debug!("tmux not found, falling back to background processes");
                BackendKind::Process
            }
        }
    };

    info!("Using {} session backend", kind);
    Ok(backend_for_kind(kind, coordination))
}

/// Backend able to act on sessions recorded with `kind`.
pub fn backend_for_kind(kind: BackendKind, coordination: &CoordinationDir) -> Arc<dyn SessionBackend> {
    match kind {
        BackendKind::Tmux => Arc::new(TmuxBackend::new()),
        BackendKind::Process => Arc::new(ProcessBackend::new(coordination.sessions_dir())),
    }
}
