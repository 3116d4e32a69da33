use std::env;
use std::path::PathBuf;

/// Mount point of the shared workspace inside the sandbox container
pub const CONTAINER_WORKSPACE_ROOT: &str = "/workspace";

/// Get the path to the Codebox directory (~/.codebox)
///
/// Falls back to the current directory when no home directory can be resolved,
/// which only happens in stripped-down service environments.
pub fn codebox_dir() -> PathBuf {
    // First try HOME environment variable (useful for tests)
    if let Ok(home) = env::var("HOME") {
        PathBuf::from(home).join(".codebox")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codebox")
    }
}

/// Get the path to the default database file (~/.codebox/codebox.db)
pub fn database_file() -> PathBuf {
    codebox_dir().join("codebox.db")
}
