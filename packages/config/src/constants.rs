// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Codebox

// Storage
pub const CODEBOX_DATABASE_PATH: &str = "CODEBOX_DATABASE_PATH";

// Workspace
pub const CODEBOX_WORKSPACE_DIR: &str = "CODEBOX_WORKSPACE_DIR";
pub const CODEBOX_WORKSPACE_MOUNT_DIR: &str = "CODEBOX_WORKSPACE_MOUNT_DIR"; // Host view when running in Docker

// Sandbox container
pub const CODEBOX_SANDBOX_IMAGE: &str = "CODEBOX_SANDBOX_IMAGE";
pub const CODEBOX_SANDBOX_DOCKERFILE: &str = "CODEBOX_SANDBOX_DOCKERFILE";
pub const CODEBOX_SANDBOX_BUILD_CONTEXT: &str = "CODEBOX_SANDBOX_BUILD_CONTEXT";
pub const CODEBOX_SANDBOX_CONTAINER: &str = "CODEBOX_SANDBOX_CONTAINER";
pub const CODEBOX_SANDBOX_MEMORY_MB: &str = "CODEBOX_SANDBOX_MEMORY_MB";
pub const CODEBOX_SANDBOX_CPUS: &str = "CODEBOX_SANDBOX_CPUS";
pub const CODEBOX_SANDBOX_PIDS_LIMIT: &str = "CODEBOX_SANDBOX_PIDS_LIMIT";
pub const CODEBOX_SANDBOX_TMP_SIZE_MB: &str = "CODEBOX_SANDBOX_TMP_SIZE_MB";
pub const CODEBOX_SANDBOX_HOME_SIZE_MB: &str = "CODEBOX_SANDBOX_HOME_SIZE_MB";

// Networks
pub const CODEBOX_INTERNAL_NETWORK: &str = "CODEBOX_INTERNAL_NETWORK";
pub const CODEBOX_EXTERNAL_NETWORK: &str = "CODEBOX_EXTERNAL_NETWORK";

// Egress proxy
pub const CODEBOX_PROXY_IMAGE: &str = "CODEBOX_PROXY_IMAGE";
pub const CODEBOX_PROXY_CONTAINER: &str = "CODEBOX_PROXY_CONTAINER";
pub const CODEBOX_PROXY_PORT: &str = "CODEBOX_PROXY_PORT";
pub const CODEBOX_PROXY_CONFIG_DIR: &str = "CODEBOX_PROXY_CONFIG_DIR";
pub const CODEBOX_ALLOWED_DOMAINS: &str = "CODEBOX_ALLOWED_DOMAINS"; // Comma separated

// Limits
pub const CODEBOX_MAX_CONCURRENT_TASKS: &str = "CODEBOX_MAX_CONCURRENT_TASKS";
pub const CODEBOX_MAX_PROJECTS: &str = "CODEBOX_MAX_PROJECTS";
pub const CODEBOX_TIMEOUT_MINUTES: &str = "CODEBOX_TIMEOUT_MINUTES";

// Agent CLI
pub const CODEBOX_AGENT_CLI: &str = "CODEBOX_AGENT_CLI";
pub const CODEBOX_AGENT_MODEL: &str = "CODEBOX_AGENT_MODEL";
pub const CODEBOX_AGENT_ALLOWED_TOOLS: &str = "CODEBOX_AGENT_ALLOWED_TOOLS"; // Comma separated

// Git identity inside the sandbox
pub const CODEBOX_GIT_USER_NAME: &str = "CODEBOX_GIT_USER_NAME";
pub const CODEBOX_GIT_USER_EMAIL: &str = "CODEBOX_GIT_USER_EMAIL";
pub const CODEBOX_GIT_TOKEN: &str = "CODEBOX_GIT_TOKEN";

// Credentials
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const CODEBOX_CREDENTIALS_PATH: &str = "CODEBOX_CREDENTIALS_PATH";

// System Environment Variables
pub const HOME: &str = "HOME";
