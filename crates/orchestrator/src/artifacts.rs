//! Files exchanged with a specialist inside its workspace.
//!
//! ```text
//! <workspace>/.fleet/
//! ├── .gitignore    # "*", artifacts are never committed
//! ├── task.md       # context artifact, written at launch
//! └── status.json   # completion status, written by the specialist
//! ```

use chrono::{DateTime, Utc};
use fleet_core::TaskDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use vcs::WorkspaceMode;

use crate::config::ResolvedConfig;
use crate::error::Result;
use crate::paths::{write_atomic, COORDINATION_DIR};

const CONTEXT_FILE: &str = "task.md";
const STATUS_FILE: &str = "status.json";

pub fn artifacts_dir(workspace: &Path) -> PathBuf {
    workspace.join(COORDINATION_DIR)
}

pub fn context_path(workspace: &Path) -> PathBuf {
    artifacts_dir(workspace).join(CONTEXT_FILE)
}

pub fn status_path(workspace: &Path) -> PathBuf {
    artifacts_dir(workspace).join(STATUS_FILE)
}

/// Everything a specialist needs to start work without asking the orchestrator.
#[derive(Debug, Clone)]
pub struct TaskContext<'a> {
    pub session_id: &'a str,
    pub task: &'a TaskDescriptor,
    pub workspace: &'a Path,
    pub mode: WorkspaceMode,
    pub branch: Option<&'a str>,
    pub config: &'a ResolvedConfig,
    pub lock_registry: &'a Path,
}

impl TaskContext<'_> {
    pub fn render(&self) -> String {
        let task = self.task;
        let mut out = String::new();

        let _ = writeln!(out, "# {}: {}\n", task.key, task.title);

        out.push_str("## Objective\n\n");
        if task.description.trim().is_empty() {
            let _ = writeln!(out, "{}\n", task.title);
        } else {
            let _ = writeln!(out, "{}\n", task.description.trim());
        }

        out.push_str("## Workspace\n\n");
        let _ = writeln!(out, "- Path: `{}`", self.workspace.display());
        let _ = writeln!(out, "- Mode: `{}`", self.mode);
        match self.branch {
            Some(branch) => {
                let _ = writeln!(out, "- Branch: `{}`", branch);
            }
            None => {
                out.push_str(
                    "- Branch: none. This is a shadow copy without version control; \
                     changes are not tracked and cannot be committed.\n",
                );
            }
        }
        let _ = writeln!(out, "- Specialist: `{}`", task.specialist);
        if let Some(priority) = &task.priority {
            let _ = writeln!(out, "- Priority: {}", priority);
        }
        if !task.labels.is_empty() {
            let _ = writeln!(out, "- Labels: {}", task.labels.join(", "));
        }
        out.push('\n');

        out.push_str("## Configuration\n\n```json\n");
        let config = serde_json::to_string_pretty(self.config).unwrap_or_else(|_| "{}".to_string());
        let _ = writeln!(out, "{}\n```\n", config);
        if let Some(minutes) = self.config.max_job_minutes {
            let _ = writeln!(out, "Aim to finish within {} minutes.\n", minutes);
        }

        out.push_str("## Coordination\n\n");
        let _ = writeln!(out, "- Run: `{}`", self.session_id);
        let _ = writeln!(
            out,
            "- Lock registry: `{}`. Before touching a resource shared with other \
             tasks, run `fleet locks {} acquire <resource> --owner {}` and release it when done.",
            self.lock_registry.display(),
            self.session_id,
            task.key
        );
        let _ = writeln!(
            out,
            "- Completion status: `{}`\n",
            status_path(self.workspace).display()
        );

        out.push_str("## Instructions\n\n");
        out.push_str("1. Work only inside the workspace path above.\n");
        if self.branch.is_some() {
            out.push_str("2. Commit your changes to the branch above.\n");
        } else {
            out.push_str("2. Leave your changes in place; there is no branch to commit to.\n");
        }
        out.push_str(
            "3. When finished, write the completion status file as JSON: \
             `{\"state\": \"completed\" | \"failed\" | \"blocked\", \"summary\": \"...\", \"commits\": [\"<sha>\"]}`.\n",
        );

        out
    }

    /// Write the context artifact and return its path.
    pub async fn write(&self) -> Result<PathBuf> {
        let dir = artifacts_dir(self.workspace);
        fs::create_dir_all(&dir).await?;
        let ignore = dir.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, "*\n").await?;
        }

        let path = context_path(self.workspace);
        write_atomic(&path, self.render().as_bytes()).await?;
        debug!(task_key = %self.task.key, "Wrote task context to {}", path.display());
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    InProgress,
    Completed,
    Failed,
    Blocked,
}

/// Written by the specialist when it stops working on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionStatus {
    pub state: CompletionState,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub commits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionRead {
    Missing,
    Unreadable { reason: String },
    Status { status: CompletionStatus },
}

/// Never fails: a missing or malformed file is reported, not raised.
pub async fn read_completion_status(workspace: &Path) -> CompletionRead {
    let path = status_path(workspace);
    if !path.exists() {
        return CompletionRead::Missing;
    }

    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            return CompletionRead::Unreadable {
                reason: e.to_string(),
            }
        }
    };

    match serde_json::from_str(&content) {
        Ok(status) => CompletionRead::Status { status },
        Err(e) => CompletionRead::Unreadable {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Priority;
    use tempfile::TempDir;

    fn task() -> TaskDescriptor {
        TaskDescriptor::new("T-1", "Add login form", "codegen")
            .with_description("Email + password form on /login")
            .with_labels(vec!["frontend".to_string()])
            .with_priority(Priority::Label("high".to_string()))
    }

    #[test]
    fn test_render_contains_everything_a_specialist_needs() {
        let task = task();
        let config = ResolvedConfig {
            max_job_minutes: Some(45),
            ..Default::default()
        };
        let context = TaskContext {
            session_id: "run-1",
            task: &task,
            workspace: Path::new("/ws/T-1"),
            mode: WorkspaceMode::IsolatedWorktree,
            branch: Some("codegen/T-1-add-login-form"),
            config: &config,
            lock_registry: Path::new("/repo/.fleet/locks/run-1.json"),
        };

        let text = context.render();

        assert!(text.starts_with("# T-1: Add login form"));
        assert!(text.contains("Email + password form on /login"));
        assert!(text.contains("`/ws/T-1`"));
        assert!(text.contains("`codegen/T-1-add-login-form`"));
        assert!(text.contains("Specialist: `codegen`"));
        assert!(text.contains("Priority: high"));
        assert!(text.contains("Labels: frontend"));
        assert!(text.contains("\"require_tests\": true"));
        assert!(text.contains("45 minutes"));
        assert!(text.contains("/repo/.fleet/locks/run-1.json"));
        assert!(text.contains("fleet locks run-1 acquire"));
        assert!(text.contains("/ws/T-1/.fleet/status.json"));
        assert!(text.contains("Commit your changes"));
    }

    #[test]
    fn test_render_warns_about_shadow_copies() {
        let task = task();
        let config = ResolvedConfig::default();
        let context = TaskContext {
            session_id: "run-1",
            task: &task,
            workspace: Path::new("/ws/T-1"),
            mode: WorkspaceMode::ShadowCopy,
            branch: None,
            config: &config,
            lock_registry: Path::new("/locks.json"),
        };

        let text = context.render();
        assert!(text.contains("shadow copy without version control"));
        assert!(!text.contains("Commit your changes"));
    }

    #[test]
    fn test_artifacts_sit_in_the_workspace_root() {
        let workspace = Path::new("/ws/T-1");

        assert_eq!(artifacts_dir(workspace).parent(), Some(workspace));
        assert_eq!(context_path(workspace), PathBuf::from("/ws/T-1/.fleet/task.md"));
        assert_eq!(status_path(workspace), PathBuf::from("/ws/T-1/.fleet/status.json"));
    }

    #[tokio::test]
    async fn test_write_creates_ignored_artifacts_dir() {
        let temp = TempDir::new().unwrap();
        let task = task();
        let config = ResolvedConfig::default();
        let context = TaskContext {
            session_id: "run-1",
            task: &task,
            workspace: temp.path(),
            mode: WorkspaceMode::FullClone,
            branch: Some("codegen/T-1-add-login-form"),
            config: &config,
            lock_registry: Path::new("/locks.json"),
        };

        let path = context.write().await.unwrap();

        assert_eq!(path, temp.path().join(".fleet/task.md"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("T-1"));
        assert_eq!(
            std::fs::read_to_string(temp.path().join(".fleet/.gitignore")).unwrap(),
            "*\n"
        );
    }

    #[tokio::test]
    async fn test_read_completion_status() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_completion_status(temp.path()).await, CompletionRead::Missing);

        std::fs::create_dir_all(temp.path().join(".fleet")).unwrap();
        std::fs::write(status_path(temp.path()), "not json").unwrap();
        assert!(matches!(
            read_completion_status(temp.path()).await,
            CompletionRead::Unreadable { .. }
        ));

        std::fs::write(
            status_path(temp.path()),
            r#"{"state": "completed", "summary": "done", "commits": ["abc123"]}"#,
        )
        .unwrap();
        match read_completion_status(temp.path()).await {
            CompletionRead::Status { status } => {
                assert_eq!(status.state, CompletionState::Completed);
                assert_eq!(status.commits, vec!["abc123".to_string()]);
                assert!(status.finished_at.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
