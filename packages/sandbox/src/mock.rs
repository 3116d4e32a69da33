// ABOUTME: In-memory SandboxRuntime used by tests across the workspace
// ABOUTME: Tracks networks, containers and execs, and replays scripted agent runs

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::error::{Result, SandboxError};
use crate::runtime::{
    ContainerSpec, ContainerState, ExecResult, ExecSpec, ExecStream, OutputChunk, SandboxRuntime,
    StreamType,
};

/// A file written through `upload_file`
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub container: String,
    pub dest_dir: String,
    pub file_name: String,
    pub contents: Vec<u8>,
    pub mode: u32,
    pub owner: (u32, u32),
}

/// Output and exit behaviour of one streamed exec
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub stdout_lines: Vec<String>,
    pub stderr: String,
    pub exit_code: Option<i64>,
    /// Pause before each stdout line
    pub line_delay: Duration,
    /// Output is withheld until a permit is available
    pub gate: Option<Arc<Semaphore>>,
    /// Never exits on its own
    pub hang: bool,
}

impl ScriptedRun {
    /// A run that prints `lines` and exits 0
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stdout_lines: lines.into_iter().map(Into::into).collect(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    /// A typical successful agent session ending in a result event
    pub fn success(text: &str, cost_usd: f64, num_turns: i64) -> Self {
        Self::lines([
            serde_json::json!({"type": "system", "subtype": "init", "session_id": "s1"}).to_string(),
            serde_json::json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": "Working on it"}]}
            })
            .to_string(),
            serde_json::json!({
                "type": "result",
                "subtype": "success",
                "is_error": false,
                "result": text,
                "duration_ms": 1200,
                "num_turns": num_turns,
                "total_cost_usd": cost_usd
            })
            .to_string(),
        ])
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[derive(Default)]
struct MockState {
    networks: BTreeMap<String, bool>,
    network_creates: usize,
    images: HashSet<String>,
    pulled: Vec<String>,
    built: Vec<String>,
    containers: HashMap<String, ContainerState>,
    container_networks: HashMap<String, Vec<String>>,
    specs: HashMap<String, ContainerSpec>,
    creates: HashMap<String, usize>,
    execs: Vec<(String, ExecSpec)>,
    spawned: Vec<ExecSpec>,
    uploads: Vec<Upload>,
    runs: VecDeque<ScriptedRun>,
    disk_usage_mb: u64,
    ping_fails: bool,
    fail_network_creation: bool,
    fail_uploads: bool,
    fail_builds: bool,
    agent_missing: bool,
    fail_spawn: bool,
    /// Execs mentioning the needle wait for a permit after being recorded
    exec_gates: Vec<(String, Arc<Semaphore>)>,
}

/// Scriptable stand-in for the Docker daemon
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    active_streams: Arc<AtomicUsize>,
    peak_streams: Arc<AtomicUsize>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.state().ping_fails = fails;
    }

    pub fn fail_network_creation(&self, fail: bool) {
        self.state().fail_network_creation = fail;
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    pub fn fail_builds(&self, fail: bool) {
        self.state().fail_builds = fail;
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.state().fail_spawn = fail;
    }

    pub fn set_agent_missing(&self, missing: bool) {
        self.state().agent_missing = missing;
    }

    /// Holds every exec whose command mentions `needle` until `gate` hands out a permit
    pub fn gate_execs(&self, needle: &str, gate: Arc<Semaphore>) {
        self.state().exec_gates.push((needle.to_string(), gate));
    }

    pub fn set_disk_usage_mb(&self, mb: u64) {
        self.state().disk_usage_mb = mb;
    }

    pub fn add_image(&self, image: &str) {
        self.state().images.insert(image.to_string());
    }

    /// Queues the behaviour of the next `exec_stream` call
    pub fn push_run(&self, run: ScriptedRun) {
        self.state().runs.push_back(run);
    }

    pub fn set_container_state(&self, name: &str, state: ContainerState) {
        self.state().containers.insert(name.to_string(), state);
    }

    /// Simulates someone running `docker rm -f` behind our back
    pub fn remove_externally(&self, name: &str) {
        let mut state = self.state();
        state.containers.remove(name);
        state.container_networks.remove(name);
    }

    pub fn network_create_count(&self) -> usize {
        self.state().network_creates
    }

    pub fn network_is_internal(&self, name: &str) -> Option<bool> {
        self.state().networks.get(name).copied()
    }

    pub fn created_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state().specs.get(name).cloned()
    }

    /// Networks a container is attached to, creation network first
    pub fn networks_of(&self, name: &str) -> Vec<String> {
        self.state()
            .container_networks
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn state_of(&self, name: &str) -> ContainerState {
        self.state()
            .containers
            .get(name)
            .copied()
            .unwrap_or(ContainerState::NotFound)
    }

    pub fn create_count(&self, name: &str) -> usize {
        self.state().creates.get(name).copied().unwrap_or(0)
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    pub fn built_images(&self) -> Vec<String> {
        self.state().built.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state().uploads.clone()
    }

    /// Every collected exec, in call order
    pub fn execs(&self) -> Vec<(String, ExecSpec)> {
        self.state().execs.clone()
    }

    /// Every streamed exec, in call order
    pub fn spawned(&self) -> Vec<ExecSpec> {
        self.state().spawned.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.state().spawned.len()
    }

    /// Execs whose command mentions `needle`
    pub fn exec_count_matching(&self, needle: &str) -> usize {
        self.state()
            .execs
            .iter()
            .filter(|(_, spec)| spec.command.iter().any(|arg| arg.contains(needle)))
            .count()
    }

    /// Streamed execs currently producing output
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active streams seen
    pub fn peak_streams(&self) -> usize {
        self.peak_streams.load(Ordering::SeqCst)
    }

    fn require_running(state: &MockState, container: &str) -> Result<()> {
        match state.containers.get(container) {
            Some(ContainerState::Running) => Ok(()),
            _ => Err(SandboxError::ContainerError(format!(
                "container {} is not running",
                container
            ))),
        }
    }
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    async fn ping(&self) -> Result<()> {
        if self.state().ping_fails {
            return Err(SandboxError::InfrastructureUnavailable(
                "mock daemon unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().networks.contains_key(name))
    }

    async fn create_network(&self, name: &str, internal: bool) -> Result<()> {
        let mut state = self.state();
        if state.fail_network_creation {
            return Err(SandboxError::NetworkSetupFailed(format!(
                "mock refused to create {}",
                name
            )));
        }
        state.networks.insert(name.to_string(), internal);
        state.network_creates += 1;
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let mut state = self.state();
        if !state.networks.contains_key(network) {
            return Err(SandboxError::NetworkSetupFailed(format!(
                "no such network {}",
                network
            )));
        }
        match state.container_networks.get_mut(container) {
            Some(networks) => {
                if !networks.iter().any(|n| n == network) {
                    networks.push(network.to_string());
                }
                Ok(())
            }
            None => Err(SandboxError::ContainerError(format!(
                "no such container {}",
                container
            ))),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        state.pulled.push(image.to_string());
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn build_image(&self, tag: &str, _dockerfile: &Path, _context: &Path) -> Result<()> {
        let mut state = self.state();
        if state.fail_builds {
            return Err(SandboxError::ImageBuildFailed("mock build error".to_string()));
        }
        state.built.push(tag.to_string());
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        let state = self.state();
        if state.ping_fails {
            return Err(SandboxError::InfrastructureUnavailable(
                "mock daemon unreachable".to_string(),
            ));
        }
        Ok(state
            .containers
            .get(name)
            .copied()
            .unwrap_or(ContainerState::NotFound))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let mut state = self.state();
        if state.containers.contains_key(&spec.name) {
            return Err(SandboxError::ContainerError(format!(
                "container {} already exists",
                spec.name
            )));
        }
        if !state.images.contains(&spec.image) {
            return Err(SandboxError::ContainerError(format!(
                "no such image {}",
                spec.image
            )));
        }
        state
            .containers
            .insert(spec.name.clone(), ContainerState::Stopped);
        state
            .container_networks
            .insert(spec.name.clone(), vec![spec.network.clone()]);
        state.specs.insert(spec.name.clone(), spec.clone());
        *state.creates.entry(spec.name.clone()).or_default() += 1;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        match state.containers.get_mut(name) {
            Some(current) => {
                *current = ContainerState::Running;
                Ok(())
            }
            None => Err(SandboxError::ContainerError(format!(
                "no such container {}",
                name
            ))),
        }
    }

    async fn stop_container(&self, name: &str, _timeout_secs: u64) -> Result<()> {
        if let Some(current) = self.state().containers.get_mut(name) {
            *current = ContainerState::Stopped;
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.containers.remove(name);
        state.container_networks.remove(name);
        Ok(())
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecResult> {
        let gate = {
            let mut state = self.state();
            Self::require_running(&state, container)?;
            state.execs.push((container.to_string(), spec.clone()));
            state
                .exec_gates
                .iter()
                .find(|(needle, _)| spec.command.iter().any(|arg| arg.contains(needle.as_str())))
                .map(|(_, gate)| gate.clone())
        };
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let state = self.state();

        let program = spec.command.first().map(String::as_str).unwrap_or_default();
        let result = match program {
            "du" => {
                let path = spec.command.last().cloned().unwrap_or_default();
                ExecResult {
                    exit_code: 0,
                    stdout: format!("{}\t{}\n", state.disk_usage_mb, path).into_bytes(),
                    stderr: Vec::new(),
                }
            }
            _ if spec.command.get(1).map(String::as_str) == Some("--version") => {
                if state.agent_missing {
                    ExecResult {
                        exit_code: 127,
                        stdout: Vec::new(),
                        stderr: format!("sh: {}: not found\n", program).into_bytes(),
                    }
                } else {
                    ExecResult {
                        exit_code: 0,
                        stdout: b"1.0.0\n".to_vec(),
                        stderr: Vec::new(),
                    }
                }
            }
            _ => ExecResult::default(),
        };
        Ok(result)
    }

    async fn exec_stream(&self, container: &str, spec: &ExecSpec) -> Result<ExecStream> {
        let run = {
            let mut state = self.state();
            Self::require_running(&state, container)?;
            if state.fail_spawn {
                return Err(SandboxError::ContainerError("mock exec refused".to_string()));
            }
            state.spawned.push(spec.clone());
            state.runs.pop_front().unwrap_or_else(|| ScriptedRun::success("done", 0.0, 1))
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let active = self.active_streams.clone();
        let peak = self.peak_streams.clone();

        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now_active, Ordering::SeqCst);
        let guard = ActiveGuard(active);

        let handle = tokio::spawn(async move {
            let _active = guard;

            if let Some(gate) = &run.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            for line in &run.stdout_lines {
                if !run.line_delay.is_zero() {
                    tokio::time::sleep(run.line_delay).await;
                }
                let _ = tx.send(OutputChunk::new(StreamType::Stdout, format!("{}\n", line)));
            }
            if !run.stderr.is_empty() {
                let _ = tx.send(OutputChunk::new(StreamType::Stderr, run.stderr.clone()));
            }

            if run.hang {
                std::future::pending::<()>().await;
            }

            drop(tx);
            let _ = exit_tx.send(run.exit_code);
        });

        Ok(ExecStream {
            output: rx,
            exit_code: exit_rx,
            abort: handle.abort_handle(),
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
        let mut state = self.state();
        if state.fail_uploads {
            return Err(SandboxError::ContainerError("mock upload refused".to_string()));
        }
        state.uploads.push(Upload {
            container: container.to_string(),
            dest_dir: dest_dir.to_string(),
            file_name: file_name.to_string(),
            contents: contents.to_vec(),
            mode,
            owner,
        });
        Ok(())
    }
}

/// Decrements the active stream count when the scripted run ends or is aborted
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
