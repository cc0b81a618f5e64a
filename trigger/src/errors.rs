//! Error types for the backup trigger

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the backup trigger
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Status API error: {0}")]
    StatusApiError(String),

    #[error("Backup already in progress")]
    InProgress,

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Failed to launch backup command: {reason}")]
    LaunchFailed { reason: String, log_path: PathBuf },

    #[error("Backup command exited with {status}")]
    BackupFailed { status: String, log_path: PathBuf },

    #[error("Backup cancelled")]
    Cancelled { log_path: PathBuf },

    #[error("Backup timed out after {secs}s")]
    TimedOut { secs: u64, log_path: PathBuf },

    #[error("Failed to report backup state: {reason}")]
    NotifyFailed { reason: String, log_path: PathBuf },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl ServiceError {
    /// Path of the run log that holds the details of a failed run, if any
    pub fn log_path(&self) -> Option<&PathBuf> {
        match self {
            ServiceError::LaunchFailed { log_path, .. }
            | ServiceError::BackupFailed { log_path, .. }
            | ServiceError::Cancelled { log_path }
            | ServiceError::TimedOut { log_path, .. }
            | ServiceError::NotifyFailed { log_path, .. } => Some(log_path),
            _ => None,
        }
    }
}
