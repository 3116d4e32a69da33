// ABOUTME: Durable project and task state for Codebox
// ABOUTME: SQLite-backed ProjectStore with soft delete, cost accounting and the crash-recovery sweep

pub mod db;
pub mod error;
pub mod projects;

pub use db::{connect_in_memory, init_pool};
pub use error::{Result, StorageError};
pub use projects::ProjectStore;
