// ABOUTME: Network topology for the sandbox stack
// ABOUTME: Idempotently ensures the internal (no internet route) and external networks exist

use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::runtime::SandboxRuntime;

/// Creates `name` unless it already exists.
///
/// `internal` networks get no route to the outside world; containers on them
/// can only reach peers on the same network.
pub async fn ensure_network(runtime: &dyn SandboxRuntime, name: &str, internal: bool) -> Result<()> {
    if runtime.network_exists(name).await? {
        debug!("Network {} already exists", name);
        return Ok(());
    }

    runtime
        .create_network(name, internal)
        .await
        .map_err(|e| match e {
            SandboxError::NetworkSetupFailed(_) => e,
            other => SandboxError::NetworkSetupFailed(other.to_string()),
        })?;

    info!("Created network {} (internal: {})", name, internal);
    Ok(())
}

/// Ensures both sandbox networks exist
pub async fn ensure_topology(
    runtime: &dyn SandboxRuntime,
    internal_network: &str,
    external_network: &str,
) -> Result<()> {
    ensure_network(runtime, internal_network, true).await?;
    ensure_network(runtime, external_network, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;

    #[tokio::test]
    async fn test_ensure_network_is_idempotent() {
        let runtime = MockRuntime::new();

        ensure_network(&runtime, "codebox-internal", true).await.unwrap();
        ensure_network(&runtime, "codebox-internal", true).await.unwrap();

        assert_eq!(runtime.network_create_count(), 1);
        assert_eq!(runtime.network_is_internal("codebox-internal"), Some(true));
    }

    #[tokio::test]
    async fn test_topology_creates_internal_and_external() {
        let runtime = MockRuntime::new();

        ensure_topology(&runtime, "in", "out").await.unwrap();

        assert_eq!(runtime.network_is_internal("in"), Some(true));
        assert_eq!(runtime.network_is_internal("out"), Some(false));
    }

    #[tokio::test]
    async fn test_creation_failure_is_network_setup_error() {
        let runtime = MockRuntime::new();
        runtime.fail_network_creation(true);

        let err = ensure_network(&runtime, "in", true).await.unwrap_err();
        assert!(matches!(err, SandboxError::NetworkSetupFailed(_)));
    }
}
