use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Optional scheduling hint carried by a task. Accepted as either a number or a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    Rank(i64),
    Label(String),
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Rank(rank) => write!(f, "{}", rank),
            Priority::Label(label) => f.write_str(label),
        }
    }
}

/// One unit of work handed to a specialist. Never mutated once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub specialist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TaskDescriptor {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        specialist: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            labels: Vec::new(),
            specialist: specialist.into(),
            priority: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Task keys become directory names under the workspace base, so they must be a
/// single, non-hidden path component.
pub fn validate_task_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CoreError::Validation("task key must not be empty".to_string()));
    }
    if key.starts_with('.') {
        return Err(CoreError::Validation(format!(
            "task key '{}' must not start with '.'",
            key
        )));
    }
    if key
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(CoreError::Validation(format!(
            "task key '{}' must be a single path component without whitespace",
            key
        )));
    }
    Ok(())
}

/// The batch document a coordinator consumes: `{ "tasks": [...], "config": {...} }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskBatch {
    pub tasks: Vec<TaskDescriptor>,
    /// Caller-supplied task configuration defaults.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl TaskBatch {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self {
            tasks,
            config: serde_json::Map::new(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Checks the batch is non-empty and every key is valid and unique.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(CoreError::Validation("task batch is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            validate_task_key(&task.key)?;
            if task.specialist.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "task '{}' has no specialist",
                    task.key
                )));
            }
            if !seen.insert(task.key.as_str()) {
                return Err(CoreError::DuplicateKey(task.key.clone()));
            }
        }
        Ok(())
    }
}
