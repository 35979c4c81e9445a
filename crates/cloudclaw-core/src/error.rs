//! Error types for CloudClaw.

use thiserror::Error;

/// Unified error type shared by every CloudClaw crate.
#[derive(Debug, Error)]
pub enum CloudClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Raw failure text from the cloud API. Displayed verbatim so that
    /// message extraction sees exactly what upstream returned.
    #[error("{0}")]
    Upstream(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CloudClawError {
    /// True for failures caused by missing records.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudClawError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudClawError>;
