// ABOUTME: Error types for task execution and service initialization
// ABOUTME: Maps storage and sandbox failures onto the rejections callers act on

use codebox_sandbox::SandboxError;
use codebox_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Too many tasks running (limit {limit}). Try again when one finishes.")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Project limit reached ({limit} per user)")]
    ProjectQuotaExceeded { limit: usize },

    #[error("{0}")]
    InvalidProjectName(String),

    #[error("A task is already running for project '{0}'")]
    TaskAlreadyRunning(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project '{0}' already exists")]
    ProjectAlreadyExists(String),

    #[error("Disk quota exceeded: {used_mb} MB used, limit is {limit_mb} MB")]
    DiskQuotaExceeded { used_mb: u64, limit_mb: u64 },

    #[error("No task is running for project '{0}'")]
    NoRunningTask(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => EngineError::ProjectNotFound(name),
            StorageError::AlreadyExists(name) => EngineError::ProjectAlreadyExists(name),
            StorageError::QuotaExceeded { limit, .. } => EngineError::ProjectQuotaExceeded { limit },
            StorageError::Validation(e) => EngineError::InvalidProjectName(e.message),
            other => EngineError::Storage(other),
        }
    }
}

impl EngineError {
    /// Rejections that happen before anything is persisted or spawned
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::ConcurrencyLimitExceeded { .. }
                | EngineError::ProjectQuotaExceeded { .. }
                | EngineError::InvalidProjectName(_)
                | EngineError::TaskAlreadyRunning(_)
                | EngineError::ProjectNotFound(_)
                | EngineError::ProjectAlreadyExists(_)
                | EngineError::DiskQuotaExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure to bring the coding feature up
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("State store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Sandbox unavailable: {0}")]
    Sandbox(#[from] SandboxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::ValidationError;

    #[test]
    fn test_storage_errors_map_to_rejections() {
        let err: EngineError = StorageError::QuotaExceeded {
            user_id: "u1".to_string(),
            limit: 10,
        }
        .into();
        assert!(matches!(err, EngineError::ProjectQuotaExceeded { limit: 10 }));
        assert!(err.is_rejection());

        let err: EngineError = StorageError::Validation(ValidationError::new("name", "bad")).into();
        assert!(matches!(err, EngineError::InvalidProjectName(ref m) if m == "bad"));

        let err: EngineError = StorageError::NotFound("demo".to_string()).into();
        assert!(matches!(err, EngineError::ProjectNotFound(_)));
    }

    #[test]
    fn test_database_errors_are_not_rejections() {
        let err: EngineError = StorageError::InvalidData("bad row".to_string()).into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_rejection());
    }
}
