//! Advisory lock registry shared by the specialists of one run.
//!
//! The orchestrator never acquires locks itself. Specialists go through
//! `fleet locks`, which makes the convention checkable instead of relying on
//! every agent editing a shared file correctly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::paths::write_atomic;

const GUARD_RETRIES: u32 = 250;
const GUARD_RETRY_DELAY: Duration = Duration::from_millis(20);
/// A guard is held for one read-modify-write; older ones were left by a dead process.
const STALE_GUARD_AGE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub resource: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

#[async_trait]
pub trait LockRegistry: Send + Sync {
    /// Idempotent for the current holder; `Conflict` for anyone else.
    async fn acquire(&self, resource: &str, owner: &str) -> Result<LockEntry>;

    /// `Ok(false)` when the resource was not held. `Conflict` when held by
    /// another owner.
    async fn release(&self, resource: &str, owner: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<LockEntry>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    locks: Vec<LockEntry>,
}

/// One JSON document per run. Mutations are serialized in-process by a mutex
/// and across processes by an exclusive sidecar file.
#[derive(Debug, Clone)]
pub struct FileLockRegistry {
    path: PathBuf,
    mutex: Arc<Mutex<()>>,
}

impl FileLockRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mutex: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<RegistryDocument> {
        if !self.path.exists() {
            return Ok(RegistryDocument::default());
        }
        let content = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Serialization(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn store(&self, doc: &RegistryDocument) -> Result<()> {
        let content = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &content).await
    }

    async fn guard(&self) -> Result<FileGuard> {
        let mut sidecar = self.path.clone().into_os_string();
        sidecar.push(".lock");
        let sidecar = PathBuf::from(sidecar);

        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent).await?;
        }

        for _ in 0..GUARD_RETRIES {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&sidecar)
                .await
            {
                Ok(_) => return Ok(FileGuard { path: sidecar }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&sidecar).await {
                        warn!("Removing stale lock registry guard {}", sidecar.display());
                        remove_stale(&sidecar).await?;
                        continue;
                    }
                    tokio::time::sleep(GUARD_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::Conflict(format!(
            "lock registry {} is busy",
            self.path.display()
        )))
    }
}

async fn is_stale(sidecar: &Path) -> bool {
    match fs::metadata(sidecar).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > STALE_GUARD_AGE)
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn remove_stale(sidecar: &Path) -> Result<()> {
    match fs::remove_file(sidecar).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

struct FileGuard {
    path: PathBuf,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl LockRegistry for FileLockRegistry {
    async fn acquire(&self, resource: &str, owner: &str) -> Result<LockEntry> {
        let _lock = self.mutex.lock().await;
        let _guard = self.guard().await?;

        let mut doc = self.load().await?;
        if let Some(existing) = doc.locks.iter().find(|l| l.resource == resource) {
            if existing.owner == owner {
                return Ok(existing.clone());
            }
            return Err(OrchestratorError::Conflict(format!(
                "{} is held by {}",
                resource, existing.owner
            )));
        }

        let entry = LockEntry {
            resource: resource.to_string(),
            owner: owner.to_string(),
            acquired_at: Utc::now(),
        };
        doc.locks.push(entry.clone());
        self.store(&doc).await?;
        info!(resource = %resource, owner = %owner, "Lock acquired");
        Ok(entry)
    }

    async fn release(&self, resource: &str, owner: &str) -> Result<bool> {
        let _lock = self.mutex.lock().await;
        let _guard = self.guard().await?;

        let mut doc = self.load().await?;
        let Some(index) = doc.locks.iter().position(|l| l.resource == resource) else {
            debug!(resource = %resource, "Release of unheld lock");
            return Ok(false);
        };

        if doc.locks[index].owner != owner {
            return Err(OrchestratorError::Conflict(format!(
                "{} is held by {}, not {}",
                resource, doc.locks[index].owner, owner
            )));
        }

        doc.locks.remove(index);
        self.store(&doc).await?;
        info!(resource = %resource, owner = %owner, "Lock released");
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<LockEntry>> {
        let _lock = self.mutex.lock().await;
        Ok(self.load().await?.locks)
    }
}
