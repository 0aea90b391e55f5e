//! Custom error types for the sync portal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to list archive {path}: {reason}")]
    Listing { path: String, reason: String },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Stopped by user")]
    Aborted,

    #[error("Shield sweep incomplete: {unscanned} archives unscanned")]
    ShieldIncomplete { unscanned: usize },

    #[error("Manifest unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// True when the error represents a deliberate user stop rather than a
    /// real failure. The orchestrator maps this to a clean terminal state.
    pub fn is_user_abort(&self) -> bool {
        matches!(self, SyncError::Aborted)
    }
}
