// ABOUTME: Egress proxy gateway for the sandbox
// ABOUTME: Renders the Squid allow-list config and keeps the proxy container running on both networks

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use codebox_config::CodeboxConfig;
use codebox_core::PathTranslator;
use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::runtime::{BindMount, ContainerSpec, ContainerState, SandboxRuntime};

pub const PROXY_CONFIG_FILE: &str = "squid.conf";
const SQUID_CONFIG_PATH: &str = "/etc/squid/squid.conf";

/// Lowercases, sorts and deduplicates the allow-list.
///
/// Squid rejects a `dstdomain` list that names both `.example.com` and
/// `api.example.com`, so entries already covered by a wildcard are dropped.
pub fn normalize_domains(domains: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();

    let wildcards: Vec<String> = normalized
        .iter()
        .filter(|d| d.starts_with('.'))
        .cloned()
        .collect();

    normalized
        .into_iter()
        .filter(|d| {
            !wildcards.iter().any(|w| {
                if w == d {
                    return false;
                }
                let bare = &w[1..];
                d == bare || d.ends_with(w.as_str())
            })
        })
        .collect()
}

/// Squid configuration allowing only `domains`, only ports 80 and 443, and
/// CONNECT only to 443. Everything else is denied.
pub fn render_proxy_config(domains: &[String], port: u16) -> String {
    let domains = normalize_domains(domains);

    let mut out = String::new();
    out.push_str("# Generated by codebox. Manual edits are overwritten.\n");
    out.push_str(&format!("http_port {}\n\n", port));

    out.push_str("acl SSL_ports port 443\n");
    out.push_str("acl Safe_ports port 80\n");
    out.push_str("acl Safe_ports port 443\n");
    out.push_str("acl CONNECT method CONNECT\n");
    for domain in &domains {
        out.push_str(&format!("acl allowed_domains dstdomain {}\n", domain));
    }
    out.push('\n');

    out.push_str("http_access deny !Safe_ports\n");
    out.push_str("http_access deny CONNECT !SSL_ports\n");
    if !domains.is_empty() {
        out.push_str("http_access allow allowed_domains\n");
    }
    out.push_str("http_access deny all\n\n");

    out.push_str("cache deny all\n");
    out.push_str("via off\n");
    out.push_str("forwarded_for delete\n");
    out.push_str("access_log stdio:/dev/stdout\n");
    out.push_str("cache_log stdio:/dev/stderr\n");
    out
}

/// Writes the rendered config into `dir`, returning the file path
pub async fn write_proxy_config(dir: &Path, contents: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SandboxError::ProxySetupFailed(format!("{}: {}", dir.display(), e)))?;

    let path = dir.join(PROXY_CONFIG_FILE);
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| SandboxError::ProxySetupFailed(format!("{}: {}", path.display(), e)))?;

    debug!("Wrote proxy config to {}", path.display());
    Ok(path)
}

pub(crate) fn proxy_container_spec(config: &CodeboxConfig, config_mount_path: &Path) -> ContainerSpec {
    ContainerSpec {
        name: config.proxy.container_name.clone(),
        image: config.proxy.image.clone(),
        binds: vec![BindMount {
            host_path: config_mount_path.to_string_lossy().into_owned(),
            container_path: SQUID_CONFIG_PATH.to_string(),
            readonly: true,
        }],
        network: config.network.external.clone(),
        labels: HashMap::from([("codebox.role".to_string(), "proxy".to_string())]),
        ..Default::default()
    }
}

/// Regenerates the allow-list and makes sure the proxy container is running.
///
/// A running proxy is left alone; the new file takes effect on its next start.
pub async fn ensure_proxy(
    runtime: &dyn SandboxRuntime,
    config: &CodeboxConfig,
    translator: &PathTranslator,
) -> Result<()> {
    let rendered = render_proxy_config(&config.proxy.allowed_domains, config.proxy.port);
    let local_path = write_proxy_config(&config.proxy.config_dir, &rendered).await?;

    let name = &config.proxy.container_name;
    match runtime.container_state(name).await? {
        ContainerState::Running => {
            debug!("Proxy {} already running", name);
            Ok(())
        }
        ContainerState::Stopped => {
            info!("Restarting stopped proxy {}", name);
            runtime
                .start_container(name)
                .await
                .map_err(|e| SandboxError::ProxySetupFailed(e.to_string()))
        }
        ContainerState::NotFound => {
            if !runtime.image_exists(&config.proxy.image).await? {
                runtime
                    .pull_image(&config.proxy.image)
                    .await
                    .map_err(|e| SandboxError::ProxySetupFailed(e.to_string()))?;
            }

            let spec = proxy_container_spec(config, &translator.to_mount_path(&local_path));
            let setup = async {
                runtime.create_container(&spec).await?;
                runtime
                    .connect_network(&config.network.internal, name)
                    .await?;
                runtime.start_container(name).await
            };
            setup
                .await
                .map_err(|e| SandboxError::ProxySetupFailed(e.to_string()))?;

            info!(
                "Proxy {} started with {} allowed domain(s)",
                name,
                config.proxy.allowed_domains.len()
            );
            Ok(())
        }
    }
}
