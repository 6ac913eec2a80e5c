//! Layout of the shared coordination directory.
//!
//! ```text
//! <repo>/.fleet/
//! ├── config.toml
//! ├── runs/orchestration-<session-id>.json[.archived]
//! ├── locks/<session-id>.json
//! └── sessions/<name>.json, <name>.log
//! ```

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{OrchestratorError, Result};

pub const COORDINATION_DIR: &str = ".fleet";
const CONFIG_FILE: &str = "config.toml";
const RUNS_DIR: &str = "runs";
const LOCKS_DIR: &str = "locks";
const SESSIONS_DIR: &str = "sessions";

/// Handle to the coordination directory. Components receive one of these
/// instead of assembling paths themselves.
#[derive(Debug, Clone)]
pub struct CoordinationDir {
    root: PathBuf,
}

impl CoordinationDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(repo_root.join(COORDINATION_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    pub fn lock_registry_path(&self, session_id: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.json", session_id))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    /// Create the directory and keep its contents out of version control.
    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let ignore = self.root.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, "*\n").await?;
        }
        Ok(())
    }
}

/// Write via a sibling temp file and rename, so readers never observe a
/// partially written document.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        OrchestratorError::Validation(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&temp_path, contents).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let dir = CoordinationDir::for_repo(Path::new("/repo"));

        assert_eq!(dir.root(), Path::new("/repo/.fleet"));
        assert_eq!(dir.config_path(), PathBuf::from("/repo/.fleet/config.toml"));
        assert_eq!(dir.runs_dir(), PathBuf::from("/repo/.fleet/runs"));
        assert_eq!(
            dir.lock_registry_path("20250101-000000-000-42"),
            PathBuf::from("/repo/.fleet/locks/20250101-000000-000-42.json")
        );
        assert_eq!(dir.sessions_dir(), PathBuf::from("/repo/.fleet/sessions"));
    }

    #[tokio::test]
    async fn test_ensure_writes_gitignore() {
        let temp = TempDir::new().unwrap();
        let dir = CoordinationDir::for_repo(temp.path());

        dir.ensure().await.unwrap();
        dir.ensure().await.unwrap();

        let ignore = std::fs::read_to_string(dir.root().join(".gitignore")).unwrap();
        assert_eq!(ignore, "*\n");
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("doc.json");

        write_atomic(&path, b"{}").await.unwrap();
        write_atomic(&path, b"{\"a\":1}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
