// ABOUTME: Credential bridge between the host and the sandbox container
// ABOUTME: Uploads agent OAuth credentials into the container independently of task execution

use std::sync::Arc;

use codebox_config::{CodeboxConfig, CredentialMode};
use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::runtime::SandboxRuntime;

pub const CREDENTIALS_FILE: &str = ".credentials.json";
const CREDENTIALS_MODE: u32 = 0o600;

/// Copies agent authentication material into the running sandbox.
///
/// Failures are reported as `CredentialInjectionFailed`; they never touch an
/// in-flight task, which keeps whatever credentials it started with.
pub struct CredentialBridge {
    runtime: Arc<dyn SandboxRuntime>,
    container: String,
    config_dir: String,
    owner: (u32, u32),
    mode: CredentialMode,
}

impl CredentialBridge {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: &CodeboxConfig) -> Self {
        Self {
            runtime,
            container: config.sandbox.container_name.clone(),
            config_dir: agent_config_dir(&config.sandbox.home_dir),
            owner: (config.sandbox.uid, config.sandbox.gid),
            mode: config.credentials.clone(),
        }
    }

    /// Validates `json` and writes it as the agent's credentials file
    pub async fn push_credentials(&self, json: &str) -> Result<()> {
        serde_json::from_str::<serde_json::Value>(json).map_err(|e| {
            SandboxError::CredentialInjectionFailed(format!("payload is not valid JSON: {}", e))
        })?;

        self.runtime
            .upload_file(
                &self.container,
                &self.config_dir,
                CREDENTIALS_FILE,
                json.as_bytes(),
                CREDENTIALS_MODE,
                self.owner,
            )
            .await
            .map_err(|e| {
                warn!("Failed to push credentials into {}: {}", self.container, e);
                SandboxError::CredentialInjectionFailed(e.to_string())
            })?;

        info!("Credentials refreshed in {}", self.container);
        Ok(())
    }

    /// Pushes the host's OAuth credentials file. No-op in API-key mode.
    pub async fn sync_from_host(&self) -> Result<()> {
        let path = match &self.mode {
            CredentialMode::ApiKey { .. } => {
                debug!("API key mode, skipping credential file sync");
                return Ok(());
            }
            CredentialMode::OAuth { credentials_path } => credentials_path,
        };

        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            SandboxError::CredentialInjectionFailed(format!("{}: {}", path.display(), e))
        })?;

        self.push_credentials(&json).await
    }
}

/// Agent configuration directory (`~/.claude`) inside the container
pub fn agent_config_dir(home_dir: &str) -> String {
    format!("{}/.claude", home_dir.trim_end_matches('/'))
}
