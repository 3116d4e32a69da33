// ABOUTME: Error type for the Codebox storage layer
// ABOUTME: Wraps sqlx and filesystem failures and the store's own rejection cases

use codebox_core::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Project '{0}' already exists")]
    AlreadyExists(String),

    #[error("Project limit reached: user {user_id} already has {limit} projects")]
    QuotaExceeded { user_id: String, limit: usize },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Corrupt row: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
