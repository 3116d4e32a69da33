// ABOUTME: Container runtime trait and the value types exchanged across it
// ABOUTME: Abstract interface over the Docker daemon so lifecycle logic can run against a mock

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::error::Result;

/// Live state of a named container, read from the daemon on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Stopped,
    NotFound,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub volume: String,
    pub container_path: String,
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `uid:gid`, or the image default when `None`
    pub user: Option<String>,
    pub env: HashMap<String, String>,
    pub command: Option<Vec<String>>,
    pub binds: Vec<BindMount>,
    pub volumes: Vec<VolumeMount>,
    /// Mount point -> tmpfs mount options
    pub tmpfs: HashMap<String, String>,
    pub network: String,
    pub memory_mb: Option<u64>,
    pub cpus: Option<f64>,
    pub pids_limit: Option<i64>,
    pub read_only_rootfs: bool,
    pub drop_all_capabilities: bool,
    pub no_new_privileges: bool,
    pub labels: HashMap<String, String>,
}

/// A command to run inside an existing container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    /// Grants the exec extended privileges regardless of the container's capability set
    pub privileged: bool,
}

impl ExecSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Collected result of a short-lived exec
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: StreamType,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn new(stream: StreamType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            stream,
            data: data.into(),
        }
    }
}

/// A long-running exec whose output is consumed as it arrives.
///
/// `output` closes when the process ends or the stream is aborted. `exit_code`
/// resolves after the output closes; an aborted or unknown exit yields `None`
/// (or a dropped sender).
pub struct ExecStream {
    pub output: mpsc::UnboundedReceiver<OutputChunk>,
    pub exit_code: oneshot::Receiver<Option<i64>>,
    /// Stops the host-side reader. The process inside the container is not signalled.
    pub abort: AbortHandle,
}

/// Container runtime used by the sandbox stack
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Fails with `InfrastructureUnavailable` if the daemon does not answer
    async fn ping(&self) -> Result<()>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    async fn create_network(&self, name: &str, internal: bool) -> Result<()>;

    async fn connect_network(&self, network: &str, container: &str) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Builds `tag` from `dockerfile` using `context` as the build context
    async fn build_image(&self, tag: &str, dockerfile: &Path, context: &Path) -> Result<()>;

    async fn container_state(&self, name: &str) -> Result<ContainerState>;

    /// Creates a container without starting it
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str, timeout_secs: u64) -> Result<()>;

    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Runs a command to completion and collects its output
    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecResult>;

    /// Starts a command and streams its output
    async fn exec_stream(&self, container: &str, spec: &ExecSpec) -> Result<ExecStream>;

    /// Writes a single file into `dest_dir` inside the container
    async fn upload_file(
        &self,
        container: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
        mode: u32,
        owner: (u32, u32),
    ) -> Result<()>;
}
