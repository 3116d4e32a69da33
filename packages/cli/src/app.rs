// ABOUTME: Startup wiring for the codebox binary
// ABOUTME: Logging, configuration, database and Docker connection into a CodingService

use std::sync::Arc;

use codebox_config::CodeboxConfig;
use codebox_executor::CodingService;
use codebox_sandbox::{DockerRuntime, SandboxRuntime};
use codebox_storage::{init_pool, ProjectStore};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub const EXIT_FAILURE: i32 = 1;
/// Exit code when the coding feature cannot be brought up at all
pub const EXIT_UNAVAILABLE: i32 = 2;

/// Startup failure: the host keeps running, only the coding feature is off
#[derive(Debug, Error)]
#[error("coding feature unavailable: {0}")]
pub struct FeatureUnavailable(pub String);

/// How much of the stack a command needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Recover, then build and start the sandbox stack
    Full,
    /// No recovery sweep and no container changes
    Maintenance,
}

pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Reads `.env` (if any) and the `CODEBOX_*` environment
pub fn load_config() -> Result<CodeboxConfig, FeatureUnavailable> {
    dotenvy::dotenv().ok();
    CodeboxConfig::from_env().map_err(|e| FeatureUnavailable(e.to_string()))
}

pub async fn open_store(config: &CodeboxConfig) -> Result<ProjectStore, FeatureUnavailable> {
    let pool = init_pool(&config.database_path)
        .await
        .map_err(|e| FeatureUnavailable(format!("database: {}", e)))?;
    Ok(ProjectStore::with_translator(
        pool,
        config.workspace.translator(),
        config.limits.max_projects,
    ))
}

/// Opens the database and connects to the local Docker daemon
pub async fn start_service(
    config: CodeboxConfig,
    mode: StartMode,
) -> Result<CodingService, FeatureUnavailable> {
    let store = open_store(&config).await?;
    let runtime = DockerRuntime::connect().map_err(|e| FeatureUnavailable(e.to_string()))?;
    start_service_with(config, Arc::new(runtime), store, mode).await
}

pub async fn start_service_with(
    config: CodeboxConfig,
    runtime: Arc<dyn SandboxRuntime>,
    store: ProjectStore,
    mode: StartMode,
) -> Result<CodingService, FeatureUnavailable> {
    debug!("Starting coding service ({:?})", mode);
    match mode {
        StartMode::Full => CodingService::initialize(config, runtime, store)
            .await
            .map_err(|e| FeatureUnavailable(e.to_string())),
        StartMode::Maintenance => Ok(CodingService::connect(config, runtime, store)),
    }
}

/// Process exit code for a command error
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<FeatureUnavailable>().is_some() {
        EXIT_UNAVAILABLE
    } else {
        EXIT_FAILURE
    }
}
