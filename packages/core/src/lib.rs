// ABOUTME: Core types, traits, and utilities for Codebox
// ABOUTME: Foundational package providing shared functionality across all Codebox packages

pub mod constants;
pub mod paths;
pub mod types;
pub mod validation;

// Re-export main types
pub use types::{Project, ProjectStatus, Task, TaskRecord};

// Re-export constants
pub use constants::{codebox_dir, database_file, CONTAINER_WORKSPACE_ROOT};

// Re-export utilities
pub use paths::PathTranslator;

// Re-export validation
pub use validation::{truncate, validate_project_name, ValidationError, PROJECT_NAME_PATTERN};
