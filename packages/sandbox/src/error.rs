// ABOUTME: Error type for sandbox infrastructure operations
// ABOUTME: One variant per failure class so callers can tell fatal init errors from advisory ones

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Docker is unavailable: {0}")]
    InfrastructureUnavailable(String),

    #[error("Image build failed: {0}")]
    ImageBuildFailed(String),

    #[error("Network setup failed: {0}")]
    NetworkSetupFailed(String),

    #[error("Proxy setup failed: {0}")]
    ProxySetupFailed(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Credential injection failed: {0}")]
    CredentialInjectionFailed(String),

    #[error("Agent CLI verification failed: {0}")]
    VerificationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// True for errors that mean the Docker daemon itself could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SandboxError::InfrastructureUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
