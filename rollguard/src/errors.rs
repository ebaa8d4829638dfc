//! Error types for rollguard

use thiserror::Error;

/// Main error type for deployments, rollbacks and cleanups
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Backup error: {0}")]
    BackupError(String),

    #[error("No backup available in {0}")]
    NoBackupAvailable(String),

    #[error("Image pull failed: {0}")]
    PullError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Deployment aborted before any change: {0}")]
    Aborted(String),

    #[error("Deployment rolled back: {0}")]
    RolledBack(String),

    #[error("Rollback exhausted: {0}")]
    RollbackExhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Process exit code for this error.
    ///
    /// `1` covers everything that stopped before touching running state,
    /// `2` a deployment that failed and was rolled back, `3` a rollback that
    /// had nothing to restore and needs an operator.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::RolledBack(_) => 2,
            DeployError::RollbackExhausted(_) => 3,
            _ => 1,
        }
    }

    /// True for failures raised before any instance or data mutation
    pub fn is_before_mutation(&self) -> bool {
        matches!(
            self,
            DeployError::ConfigError(_)
                | DeployError::ValidationError(_)
                | DeployError::BackupError(_)
                | DeployError::PullError(_)
                | DeployError::Aborted(_)
        )
    }
}
