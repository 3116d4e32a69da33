// ABOUTME: Docker implementation of SandboxRuntime
// ABOUTME: Uses bollard for networks, images, containers, exec streams and file uploads

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
        UploadToContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::{BuildImageOptions, CreateImageOptions},
    models::{ContainerStateStatusEnum, EndpointSettings, HostConfig, Mount, MountTypeEnum},
    network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions},
    Docker,
};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SandboxError};
use crate::runtime::{
    ContainerSpec, ContainerState, ExecResult, ExecSpec, ExecStream, OutputChunk,
    SandboxRuntime, StreamType,
};

/// Name the Dockerfile gets inside the build archive when it lives outside the context
const OUT_OF_CONTEXT_DOCKERFILE: &str = "Dockerfile.codebox";

pub struct DockerRuntime {
    client: Docker,
    /// Timeout for image pulls and builds (default: 10 minutes)
    image_timeout: Duration,
}

impl DockerRuntime {
    /// Connects using the platform defaults (`DOCKER_HOST` or the local socket)
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_defaults().map_err(|e| {
            SandboxError::InfrastructureUnavailable(format!(
                "cannot connect to the Docker socket: {}",
                e
            ))
        })?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            image_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_image_timeout(mut self, timeout: Duration) -> Self {
        self.image_timeout = timeout;
        self
    }

    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let binds: Vec<String> = spec
            .binds
            .iter()
            .map(|b| {
                format!(
                    "{}:{}:{}",
                    b.host_path,
                    b.container_path,
                    if b.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let mounts: Vec<Mount> = spec
            .volumes
            .iter()
            .map(|v| Mount {
                target: Some(v.container_path.clone()),
                source: Some(v.volume.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(false),
                ..Default::default()
            })
            .collect();

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            binds: Some(binds),
            mounts: Some(mounts),
            tmpfs: if spec.tmpfs.is_empty() {
                None
            } else {
                Some(spec.tmpfs.clone())
            },
            network_mode: Some(spec.network.clone()),
            memory: spec.memory_mb.map(|mb| (mb * 1024 * 1024) as i64),
            nano_cpus: spec.cpus.map(|c| (c * 1_000_000_000.0) as i64),
            pids_limit: spec.pids_limit,
            readonly_rootfs: Some(spec.read_only_rootfs),
            cap_drop: if spec.drop_all_capabilities {
                Some(vec!["ALL".to_string()])
            } else {
                None
            },
            security_opt: if spec.no_new_privileges {
                Some(vec!["no-new-privileges:true".to_string()])
            } else {
                None
            },
            ..Default::default()
        };

        let mut labels = spec.labels.clone();
        labels.insert("codebox.managed".to_string(), "true".to_string());

        Config {
            image: Some(spec.image.clone()),
            user: spec.user.clone(),
            cmd: spec.command.clone(),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn start_exec_attached(
        &self,
        container: &str,
        spec: &ExecSpec,
    ) -> Result<(String, StartExecResults)> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let options = CreateExecOptions {
            cmd: Some(spec.command.clone()),
            user: spec.user.clone(),
            working_dir: spec.working_dir.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            privileged: Some(spec.privileged),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container, options)
            .await
            .map_err(|e| container_error(container, e))?;

        let started = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| container_error(container, e))?;

        Ok((exec.id, started))
    }

    /// Consumes a pull or build progress stream, failing on the first error entry
    async fn drain_image_stream<S, T, F, E>(
        &self,
        what: &str,
        stream: S,
        status: F,
        failure: E,
    ) -> std::result::Result<(), String>
    where
        S: futures::Stream<Item = std::result::Result<T, bollard::errors::Error>>,
        F: Fn(&T) -> Option<String>,
        E: Fn(&T) -> Option<String>,
    {
        let result = tokio::time::timeout(self.image_timeout, async {
            let mut stream = Box::pin(stream);
            let mut last_status = String::new();
            while let Some(item) = stream.next().await {
                let item = item.map_err(|e| e.to_string())?;
                if let Some(message) = failure(&item) {
                    return Err(message);
                }
                if let Some(s) = status(&item) {
                    let s = s.trim().to_string();
                    if !s.is_empty() && s != last_status {
                        debug!("{}: {}", what, s);
                        last_status = s;
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(format!("timed out after {:?}", self.image_timeout)),
        }
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn container_error(container: &str, e: bollard::errors::Error) -> SandboxError {
    SandboxError::ContainerError(format!("{}: {}", container, e))
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(|e| {
            warn!("Docker not available: {}", e);
            SandboxError::InfrastructureUnavailable(e.to_string())
        })?;
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(SandboxError::NetworkSetupFailed(e.to_string())),
        }
    }

    async fn create_network(&self, name: &str, internal: bool) -> Result<()> {
        info!("Creating network: {} (internal: {})", name, internal);

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            internal,
            ..Default::default()
        };

        self.client
            .create_network(options)
            .await
            .map_err(|e| SandboxError::NetworkSetupFailed(format!("{}: {}", name, e)))?;
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        debug!("Connecting {} to network {}", container, network);

        let options = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings::default(),
        };

        self.client
            .connect_network(network, options)
            .await
            .map_err(|e| {
                SandboxError::NetworkSetupFailed(format!(
                    "connecting {} to {}: {}",
                    container, network, e
                ))
            })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(SandboxError::ContainerError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.image_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        self.drain_image_stream(
            "Pull status",
            stream,
            |info| info.status.clone(),
            |info| info.error.clone(),
        )
        .await
        .map_err(|e| SandboxError::ImageBuildFailed(format!("pulling {}: {}", image, e)))?;

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn build_image(&self, tag: &str, dockerfile: &Path, context: &Path) -> Result<()> {
        info!(
            "Building image {} from {} (context: {})",
            tag,
            dockerfile.display(),
            context.display()
        );

        let (archive, dockerfile_name) = create_build_archive(dockerfile, context)
            .map_err(|e| SandboxError::ImageBuildFailed(format!("packing build context: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: dockerfile_name,
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            pull: false,
            ..Default::default()
        };

        let stream = self.client.build_image(options, None, Some(archive.into()));

        self.drain_image_stream(
            "Build",
            stream,
            |info| info.stream.clone(),
            |info| {
                info.error
                    .clone()
                    .or_else(|| info.error_detail.as_ref().and_then(|d| d.message.clone()))
            },
        )
        .await
        .map_err(|e| SandboxError::ImageBuildFailed(format!("{}: {}", tag, e)))?;

        info!("Built image: {}", tag);
        Ok(())
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let status = inspect.state.and_then(|s| s.status);
                Ok(match status {
                    Some(ContainerStateStatusEnum::RUNNING)
                    | Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Running,
                    _ => ContainerState::Stopped,
                })
            }
            Err(e) if is_not_found(&e) => Ok(ContainerState::NotFound),
            Err(e) => Err(SandboxError::InfrastructureUnavailable(e.to_string())),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        info!("Creating container: {}", spec.name);

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await
            .map_err(|e| container_error(&spec.name, e))?;

        for warning in container.warnings {
            warn!("Docker warning for {}: {}", spec.name, warning);
        }
        debug!("Created container: {} ({})", spec.name, container.id);
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        info!("Starting container: {}", name);

        self.client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| container_error(name, e))
    }

    async fn stop_container(&self, name: &str, timeout_secs: u64) -> Result<()> {
        info!("Stopping container: {} (timeout: {}s)", name, timeout_secs);

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        match self.client.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(container_error(name, e)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        info!("Removing container: {}", name);

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(container_error(name, e)),
        }
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecResult> {
        debug!("Executing in {}: {:?}", container, spec.command);

        let (exec_id, started) = self.start_exec_attached(container, spec).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match started {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => return Err(container_error(container, e)),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(SandboxError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let inspect = self
            .client
            .inspect_exec(&exec_id)
            .await
            .map_err(|e| container_error(container, e))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn exec_stream(&self, container: &str, spec: &ExecSpec) -> Result<ExecStream> {
        debug!("Streaming exec in {}: {:?}", container, spec.command.first());

        let (exec_id, started) = self.start_exec_attached(container, spec).await?;

        let mut output = match started {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(SandboxError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let client = self.client.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg) = output.next().await {
                let chunk = match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        OutputChunk::new(StreamType::Stdout, message.to_vec())
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        OutputChunk::new(StreamType::Stderr, message.to_vec())
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Error streaming exec output: {}", e);
                        break;
                    }
                };
                if tx.send(chunk).is_err() {
                    break; // Receiver dropped
                }
            }
            drop(tx);

            let exit_code = match client.inspect_exec(&exec_id).await {
                Ok(inspect) => inspect.exit_code,
                Err(e) => {
                    warn!("Failed to inspect exec {}: {}", exec_id, e);
                    None
                }
            };
            let _ = exit_tx.send(exit_code);
        });

        Ok(ExecStream {
            output: rx,
            exit_code: exit_rx,
            abort: reader.abort_handle(),
        })
    }

    async fn upload_file(
        &self,
        container: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
        mode: u32,
        owner: (u32, u32),
    ) -> Result<()> {
        debug!("Uploading {}/{} to {}", dest_dir, file_name, container);

        let archive = create_file_archive(file_name, contents, mode, owner)?;

        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container, Some(options), archive.into())
            .await
            .map_err(|e| container_error(container, e))
    }
}

/// Tar archive holding one regular file with explicit ownership and mode
fn create_file_archive(
    file_name: &str,
    contents: &[u8],
    mode: u32,
    owner: (u32, u32),
) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_uid(owner.0 as u64);
    header.set_gid(owner.1 as u64);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_data(&mut header, file_name, contents)?;
    archive.into_inner()
}

/// Build context archive plus the Dockerfile's path inside it
fn create_build_archive(dockerfile: &Path, context: &Path) -> std::io::Result<(Vec<u8>, String)> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.append_dir_all(".", context)?;

    let dockerfile_name = match dockerfile.strip_prefix(context) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => {
            let mut file = std::fs::File::open(dockerfile)?;
            archive.append_file(OUT_OF_CONTEXT_DOCKERFILE, &mut file)?;
            OUT_OF_CONTEXT_DOCKERFILE.to_string()
        }
    };

    Ok((archive.into_inner()?, dockerfile_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{BindMount, VolumeMount};
    use std::collections::HashMap;
    use std::io::Read;

    fn sample_spec() -> ContainerSpec {
        ContainerSpec {
            name: "codebox-sandbox".to_string(),
            image: "codebox-sandbox:latest".to_string(),
            user: Some("1000:1000".to_string()),
            env: HashMap::from([("HTTP_PROXY".to_string(), "http://p:3128".to_string())]),
            command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            binds: vec![BindMount {
                host_path: "/srv/workspace".to_string(),
                container_path: "/workspace".to_string(),
                readonly: false,
            }],
            volumes: vec![VolumeMount {
                volume: "codebox-agent-config".to_string(),
                container_path: "/home/agent/.claude".to_string(),
            }],
            tmpfs: HashMap::from([("/tmp".to_string(), "size=64m".to_string())]),
            network: "codebox-internal".to_string(),
            memory_mb: Some(512),
            cpus: Some(1.5),
            pids_limit: Some(128),
            read_only_rootfs: true,
            drop_all_capabilities: true,
            no_new_privileges: true,
            labels: HashMap::new(),
        }
    }

    #[test]
    fn test_container_config_conversion() {
        let config = DockerRuntime::to_bollard_config(&sample_spec());
        let host = config.host_config.unwrap();

        assert_eq!(config.image.as_deref(), Some("codebox-sandbox:latest"));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.pids_limit, Some(128));
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(host.network_mode.as_deref(), Some("codebox-internal"));
        assert_eq!(
            host.binds,
            Some(vec!["/srv/workspace:/workspace:rw".to_string()])
        );
        let mounts = host.mounts.unwrap();
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::VOLUME));
        assert_eq!(mounts[0].source.as_deref(), Some("codebox-agent-config"));
        assert!(config
            .labels
            .unwrap()
            .contains_key("codebox.managed"));
    }

    #[test]
    fn test_relaxed_spec_sets_no_restrictions() {
        let spec = ContainerSpec {
            name: "proxy".to_string(),
            image: "ubuntu/squid:latest".to_string(),
            network: "codebox-external".to_string(),
            ..Default::default()
        };
        let host = DockerRuntime::to_bollard_config(&spec).host_config.unwrap();
        assert!(host.cap_drop.is_none());
        assert!(host.security_opt.is_none());
        assert!(host.tmpfs.is_none());
        assert_eq!(host.readonly_rootfs, Some(false));
    }

    #[test]
    fn test_file_archive_carries_mode_and_owner() {
        let data = create_file_archive(".credentials.json", b"{}", 0o600, (1000, 1000)).unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();

        assert_eq!(entry.header().mode().unwrap(), 0o600);
        assert_eq!(entry.header().uid().unwrap(), 1000);
        assert_eq!(entry.header().gid().unwrap(), 1000);
        assert_eq!(
            entry.path().unwrap().to_string_lossy(),
            ".credentials.json"
        );
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "{}");
    }

    #[test]
    fn test_build_archive_uses_relative_dockerfile() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM node:20-slim\n").unwrap();

        let (data, name) =
            create_build_archive(&dir.path().join("Dockerfile"), dir.path()).unwrap();
        assert_eq!(name, "Dockerfile");
        assert!(!data.is_empty());
    }

    #[test]
    fn test_build_archive_embeds_outside_dockerfile() {
        let context = tempfile::TempDir::new().unwrap();
        let other = tempfile::TempDir::new().unwrap();
        std::fs::write(context.path().join("setup.sh"), "echo hi\n").unwrap();
        std::fs::write(other.path().join("Dockerfile"), "FROM alpine\n").unwrap();

        let (data, name) =
            create_build_archive(&other.path().join("Dockerfile"), context.path()).unwrap();
        assert_eq!(name, OUT_OF_CONTEXT_DOCKERFILE);

        let mut archive = tar::Archive::new(data.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("setup.sh")));
        assert!(names.iter().any(|n| n == OUT_OF_CONTEXT_DOCKERFILE));
    }
}
