use fleet_core::CoreError;
use thiserror::Error;
use vcs::VcsError;

use crate::lifecycle::CleanupReport;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Creation failed: {command}: {diagnostics}")]
    CreationFailed { command: String, diagnostics: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Cleanup of {session_id} partially failed: {} resource(s) could not be torn down",
        .report.failures.len()
    )]
    CleanupPartialFailure {
        session_id: String,
        report: Box<CleanupReport>,
    },

    #[error("Session backend error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("VCS error: {0}")]
    Vcs(VcsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Create a creation failed error for a tool invocation.
    pub fn creation_failed(command: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::CreationFailed {
            command: command.into(),
            diagnostics: diagnostics.into(),
        }
    }
}

impl From<VcsError> for OrchestratorError {
    fn from(err: VcsError) -> Self {
        match err {
            VcsError::NotARepository(path) => Self::Validation(format!(
                "{} is not a version-controlled repository",
                path.display()
            )),
            VcsError::CommandFailed {
                command,
                diagnostics,
            } => Self::CreationFailed {
                command,
                diagnostics,
            },
            VcsError::Io(e) => Self::Io(e),
            other => Self::Vcs(other),
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => Self::Io(e),
            CoreError::DuplicateKey(key) => {
                Self::Conflict(format!("task key '{}' appears more than once", key))
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
