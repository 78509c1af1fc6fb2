//! Error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A collaborator call (hosting panel, object store) failed.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Source unavailable: {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A backup pass is already in progress")]
    PassInProgress,

    #[error("Folder {0} is already being backed up")]
    LabelBusy(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        EngineError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
