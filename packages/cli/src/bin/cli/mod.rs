// ABOUTME: Subcommand handlers of the codebox binary
// ABOUTME: Shared helpers for opening the store and resolving the current user

pub mod projects;
pub mod sandbox;
pub mod tasks;

use codebox_cli::{load_config, open_store};
use codebox_storage::ProjectStore;

/// Store-only access for commands that never touch Docker
pub async fn store() -> anyhow::Result<ProjectStore> {
    let config = load_config()?;
    Ok(open_store(&config).await?)
}

/// Owner recorded on new projects
pub fn current_user() -> String {
    std::env::var("CODEBOX_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "local".to_string())
}
