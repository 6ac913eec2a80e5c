//! Fallback backend for hosts without a terminal multiplexer: one detached
//! `sh -c` process group per session, tracked through a small record file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::paths::write_atomic;

use super::backend::{BackendKind, SessionBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessRecord {
    name: String,
    cwd: PathBuf,
    /// Unset until a command has been sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    log: PathBuf,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProcessBackend {
    sessions_dir: PathBuf,
}

impl ProcessBackend {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", name))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.log", name))
    }

    async fn load(&self, name: &str) -> Result<Option<ProcessRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring corrupt session record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &ProcessRecord) -> Result<()> {
        let content = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.name), &content).await
    }

    async fn remove_record(&self, name: &str) -> Result<()> {
        let path = self.record_path(name);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn create_session(&self, name: &str, cwd: &Path) -> Result<()> {
        if !cwd.is_dir() {
            return Err(OrchestratorError::creation_failed(
                format!("create session {}", name),
                format!("{} is not a directory", cwd.display()),
            ));
        }

        let record = ProcessRecord {
            name: name.to_string(),
            cwd: cwd.to_path_buf(),
            pid: None,
            log: self.log_path(name),
            started_at: Utc::now(),
        };
        self.save(&record).await?;
        debug!("Registered process session {}", name);
        Ok(())
    }

    async fn send_command(&self, name: &str, command: &str) -> Result<()> {
        let mut record = self
            .load(name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("session {}", name)))?;

        if record.pid.is_some_and(is_alive) {
            return Err(OrchestratorError::Conflict(format!(
                "session {} is already running a command",
                name
            )));
        }

        fs::create_dir_all(&self.sessions_dir).await?;
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&record.log)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&record.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::creation_failed(format!("sh -c {}", command), e.to_string())
        })?;
        let pid = child.id().ok_or_else(|| {
            OrchestratorError::Session(format!("session {} exited before it started", name))
        })?;

        // Reap the child while this process lives; afterwards init inherits it.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        record.pid = Some(pid);
        record.started_at = Utc::now();
        self.save(&record).await?;
        info!("Started process session {} (pid {})", name, pid);
        Ok(())
    }

    async fn session_exists(&self, name: &str) -> Result<bool> {
        Ok(match self.load(name).await? {
            None => false,
            Some(ProcessRecord { pid: None, .. }) => true,
            Some(ProcessRecord { pid: Some(pid), .. }) => is_alive(pid),
        })
    }

    async fn kill_session(&self, name: &str) -> Result<bool> {
        let Some(record) = self.load(name).await? else {
            return Ok(false);
        };

        let was_alive = match record.pid {
            None => true,
            Some(pid) if is_alive(pid) => {
                terminate(pid)?;
                true
            }
            Some(_) => false,
        };

        self.remove_record(name).await?;
        debug!("Removed process session {}", name);
        Ok(was_alive)
    }
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(OrchestratorError::Session(format!(
            "failed to signal process group {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<()> {
    Err(OrchestratorError::Session(format!(
        "cannot terminate process {} on this platform",
        pid
    )))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let temp = TempDir::new().unwrap();
        let backend = ProcessBackend::new(temp.path().join("sessions"));
        let cwd = temp.path();

        assert!(!backend.session_exists("fleet-T-1").await.unwrap());

        backend.create_session("fleet-T-1", cwd).await.unwrap();
        assert!(backend.session_exists("fleet-T-1").await.unwrap());

        backend.send_command("fleet-T-1", "sleep 30").await.unwrap();
        assert!(backend.session_exists("fleet-T-1").await.unwrap());

        assert!(backend.kill_session("fleet-T-1").await.unwrap());
        assert!(!backend.session_exists("fleet-T-1").await.unwrap());
        assert!(!backend.kill_session("fleet-T-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_output_goes_to_log() {
        let temp = TempDir::new().unwrap();
        let backend = ProcessBackend::new(temp.path().join("sessions"));

        backend.create_session("fleet-T-2", temp.path()).await.unwrap();
        backend.send_command("fleet-T-2", "echo hello").await.unwrap();

        let log = backend.log_path("fleet-T-2");
        let mut content = String::new();
        for _ in 0..50 {
            content = std::fs::read_to_string(&log).unwrap_or_default();
            if content.contains("hello") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(content.contains("hello"));
    }

    #[tokio::test]
    async fn test_send_to_unknown_session() {
        let temp = TempDir::new().unwrap();
        let backend = ProcessBackend::new(temp.path());

        let err = backend.send_command("fleet-nope", "true").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_in_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let backend = ProcessBackend::new(temp.path());

        let err = backend
            .create_session("fleet-T-3", &temp.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CreationFailed { .. }));
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }
}
