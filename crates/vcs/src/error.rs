use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Not a version-controlled repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("{command} failed: {diagnostics}")]
    CommandFailed { command: String, diagnostics: String },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Invalid workspace path: {0}")]
    InvalidPath(String),

    #[error("Unknown workspace mode: {0}")]
    UnknownMode(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    pub(crate) fn command_failed(command: impl Into<String>, stderr: &[u8]) -> Self {
        Self::CommandFailed {
            command: command.into(),
            diagnostics: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VcsError>;
