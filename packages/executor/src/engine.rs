// ABOUTME: Task execution engine supervising one agent run per project inside the sandbox
// ABOUTME: Admission control, disk quota, streaming output, timeout/cancel and result persistence

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use codebox_config::{AgentConfig, CodeboxConfig};
use codebox_core::{validate_project_name, Project, ProjectStatus, TaskRecord};
use codebox_sandbox::{ExecStream, OutputChunk, SandboxStack, StreamType};
use codebox_storage::{ProjectStore, StorageError};
use serde::Serialize;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::build_agent_command;
use crate::error::{EngineError, Result};
use crate::ndjson::{parse_line, LineBuffer, ResultEvent, StreamEvent};

/// Per-project workspace size limit
pub const DISK_QUOTA_MB: u64 = 2048;

/// Minimum gap between two progress callbacks for one task
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// How much stderr is kept per run (the tail)
pub const STDERR_LIMIT: usize = 64 * 1024;

const OOM_EXIT_CODE: i64 = 137;
const EXIT_CODE_WAIT: Duration = Duration::from_secs(5);
const CANCELLED_MESSAGE: &str = "Task cancelled";

/// Receives the progress and the final outcome of one task.
///
/// Exactly one of `on_complete` / `on_error` is called for every admitted task.
pub trait TaskObserver: Send + Sync {
    fn on_progress(&self, _text: &str) {}

    fn on_complete(&self, outcome: &TaskOutcome, project: &Project);

    fn on_error(&self, message: &str, project: &Project);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcomeKind {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    OomKilled,
}

impl TaskOutcomeKind {
    /// Project status recorded after a run ending this way
    pub fn project_status(self) -> ProjectStatus {
        match self {
            TaskOutcomeKind::Completed => ProjectStatus::Completed,
            TaskOutcomeKind::Cancelled => ProjectStatus::Active,
            TaskOutcomeKind::Failed | TaskOutcomeKind::TimedOut | TaskOutcomeKind::OomKilled => {
                ProjectStatus::Error
            }
        }
    }
}

/// What a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub kind: TaskOutcomeKind,
    pub success: bool,
    pub text: String,
    pub duration_ms: i64,
    pub num_turns: i64,
    pub cost_usd: f64,
    pub exit_code: Option<i64>,
    /// Id of the recorded task row, if persisting succeeded
    pub task_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
    pub progress_interval: Duration,
    pub disk_quota_mb: u64,
    pub stderr_limit: usize,
}

impl EngineSettings {
    pub fn from_config(config: &CodeboxConfig) -> Self {
        Self {
            max_concurrent_tasks: config.limits.max_concurrent_tasks,
            task_timeout: Duration::from_secs(config.limits.timeout_minutes.saturating_mul(60)),
            progress_interval: PROGRESS_INTERVAL,
            disk_quota_mb: DISK_QUOTA_MB,
            stderr_limit: STDERR_LIMIT,
        }
    }
}

struct RunningTaskHandle {
    run_id: u64,
    cancel: CancellationToken,
    /// Set once the agent process has been spawned
    abort: Option<AbortHandle>,
    started_at: Instant,
}

struct EngineInner {
    stack: Arc<SandboxStack>,
    store: ProjectStore,
    agent: AgentConfig,
    settings: EngineSettings,
    handles: Mutex<HashMap<String, RunningTaskHandle>>,
    next_run_id: AtomicU64,
}

impl EngineInner {
    fn lock_handles(&self) -> MutexGuard<'_, HashMap<String, RunningTaskHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn owns(&self, project: &str, run_id: u64) -> bool {
        self.lock_handles().get(project).map(|h| h.run_id) == Some(run_id)
    }

    /// Removes the handle for `project` if it still belongs to `run_id`
    fn release(&self, project: &str, run_id: u64) {
        let mut handles = self.lock_handles();
        if handles.get(project).map(|h| h.run_id) == Some(run_id) {
            handles.remove(project);
        }
    }
}

/// Frees an admission slot when dropped, whatever path the run took
struct Reservation {
    inner: Arc<EngineInner>,
    project: String,
    run_id: u64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.inner.release(&self.project, self.run_id);
    }
}

/// A task that passed admission and holds a slot
pub struct Admission {
    project: Project,
    prompt: String,
    cancel: CancellationToken,
    reservation: Reservation,
}

impl Admission {
    pub fn project(&self) -> &Project {
        &self.project
    }
}

enum RunEnd {
    Exited,
    TimedOut,
    Cancelled,
}

struct RunCapture {
    end: RunEnd,
    result: Option<ResultEvent>,
    stderr: String,
    exit_code: Option<i64>,
}

/// Runs coding-agent tasks in the shared sandbox, at most one per project
#[derive(Clone)]
pub struct TaskExecutionEngine {
    inner: Arc<EngineInner>,
}

impl TaskExecutionEngine {
    pub fn new(stack: Arc<SandboxStack>, store: ProjectStore, config: &CodeboxConfig) -> Self {
        Self::with_settings(
            stack,
            store,
            config.agent.clone(),
            EngineSettings::from_config(config),
        )
    }

    pub fn with_settings(
        stack: Arc<SandboxStack>,
        store: ProjectStore,
        agent: AgentConfig,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                stack,
                store,
                agent,
                settings,
                handles: Mutex::new(HashMap::new()),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn is_task_running(&self, project: &str) -> bool {
        self.inner.lock_handles().contains_key(project)
    }

    pub fn running_task_count(&self) -> usize {
        self.inner.lock_handles().len()
    }

    pub fn running_projects(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock_handles().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs a task to completion. Rejections are returned without notifying `observer`.
    pub async fn run_task(
        &self,
        project: &str,
        prompt: &str,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<TaskOutcome> {
        let admission = self.admit(project, prompt).await?;
        self.execute(admission, observer).await
    }

    /// Admits a task and runs it in the background.
    ///
    /// Only admission errors are returned; everything after that reaches `observer`.
    pub async fn start_task(
        &self,
        project: &str,
        prompt: &str,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<JoinHandle<()>> {
        let admission = self.admit(project, prompt).await?;
        let engine = self.clone();
        let name = project.to_string();

        Ok(tokio::spawn(async move {
            if let Err(e) = engine.execute(admission, observer).await {
                debug!("Task for '{}' ended before running: {}", name, e);
            }
        }))
    }

    /// Reserves a slot for `project`.
    ///
    /// The capacity check and the reservation happen under one lock, before any
    /// await, so concurrent callers can never overshoot the limit.
    pub async fn admit(&self, project: &str, prompt: &str) -> Result<Admission> {
        validate_project_name(project).map_err(|e| EngineError::InvalidProjectName(e.message))?;

        let cancel = CancellationToken::new();
        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut handles = self.inner.lock_handles();
            if handles.len() >= self.inner.settings.max_concurrent_tasks {
                return Err(EngineError::ConcurrencyLimitExceeded {
                    limit: self.inner.settings.max_concurrent_tasks,
                });
            }
            if handles.contains_key(project) {
                return Err(EngineError::TaskAlreadyRunning(project.to_string()));
            }
            handles.insert(
                project.to_string(),
                RunningTaskHandle {
                    run_id,
                    cancel: cancel.clone(),
                    abort: None,
                    started_at: Instant::now(),
                },
            );
        }
        let reservation = Reservation {
            inner: self.inner.clone(),
            project: project.to_string(),
            run_id,
        };

        let project = self
            .inner
            .store
            .get_project(project)
            .await?
            .ok_or_else(|| EngineError::ProjectNotFound(project.to_string()))?;

        Ok(Admission {
            project,
            prompt: prompt.to_string(),
            cancel,
            reservation,
        })
    }

    /// Drives an admitted task to its end and notifies `observer` exactly once
    pub async fn execute(
        &self,
        admission: Admission,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<TaskOutcome> {
        let snapshot = admission.project.clone();

        match self.run_admitted(admission, observer.as_ref()).await {
            Ok((outcome, project)) => {
                if outcome.kind == TaskOutcomeKind::Completed {
                    observer.on_complete(&outcome, &project);
                } else {
                    observer.on_error(&outcome.text, &project);
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!("Task for '{}' not started: {}", snapshot.name, e);
                observer.on_error(&e.to_string(), &snapshot);
                Err(e)
            }
        }
    }

    /// Cancels the running task of `project` and frees its slot immediately
    pub async fn cancel_task(&self, project: &str) -> Result<()> {
        let handle = self
            .inner
            .lock_handles()
            .remove(project)
            .ok_or_else(|| EngineError::NoRunningTask(project.to_string()))?;

        handle.cancel.cancel();
        if let Some(abort) = &handle.abort {
            abort.abort();
        }
        info!(
            "Cancelled task for project '{}' after {}s",
            project,
            handle.started_at.elapsed().as_secs()
        );

        // Status before the kill: a retry's `running` write must land after this one
        let status = match self
            .inner
            .store
            .update_status(project, ProjectStatus::Active)
            .await
        {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = self
            .inner
            .stack
            .kill_agent_process(project, handle.run_id)
            .await
        {
            warn!("Could not kill agent process for '{}': {}", project, e);
        }

        status
    }

    /// Cancels every running task, returning how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for project in self.running_projects() {
            match self.cancel_task(&project).await {
                Ok(()) => cancelled += 1,
                Err(EngineError::NoRunningTask(_)) => {}
                Err(e) => warn!("Failed to cancel task for '{}': {}", project, e),
            }
        }
        cancelled
    }

    async fn run_admitted(
        &self,
        admission: Admission,
        observer: &dyn TaskObserver,
    ) -> Result<(TaskOutcome, Project)> {
        let Admission {
            project,
            prompt,
            cancel,
            reservation,
        } = admission;
        let name = project.name.clone();
        let settings = &self.inner.settings;
        let stack = &self.inner.stack;
        let store = &self.inner.store;

        stack.ensure_ready().await?;

        let used_mb = stack.disk_usage_mb(&name).await?;
        if used_mb > settings.disk_quota_mb {
            return Err(EngineError::DiskQuotaExceeded {
                used_mb,
                limit_mb: settings.disk_quota_mb,
            });
        }

        if cancel.is_cancelled() {
            let outcome = TaskOutcome {
                kind: TaskOutcomeKind::Cancelled,
                success: false,
                text: CANCELLED_MESSAGE.to_string(),
                duration_ms: 0,
                num_turns: 0,
                cost_usd: 0.0,
                exit_code: None,
                task_id: None,
            };
            return Ok((outcome, project));
        }

        let continue_session = store.count_tasks(&project.id).await? > 0;
        store.update_status(&name, ProjectStatus::Running).await?;

        let command = build_agent_command(&self.inner.agent, &prompt, continue_session);
        info!(
            "Starting agent for project '{}' (continue: {})",
            name, continue_session
        );
        let started = Instant::now();

        let run_id = reservation.run_id;
        let capture = match stack.spawn_agent(&name, run_id, command).await {
            Ok(stream) => {
                {
                    let mut handles = self.inner.lock_handles();
                    if let Some(handle) = handles.get_mut(&name) {
                        if handle.run_id == run_id {
                            handle.abort = Some(stream.abort.clone());
                        }
                    }
                }
                self.supervise(stream, &cancel, observer).await
            }
            Err(e) => {
                error!("Failed to start agent for '{}': {}", name, e);
                RunCapture {
                    end: RunEnd::Exited,
                    result: None,
                    stderr: format!("Failed to start agent: {}", e),
                    exit_code: None,
                }
            }
        };

        if let Err(e) = stack.kill_agent_process(&name, run_id).await {
            debug!("Post-run cleanup for '{}' failed: {}", name, e);
        }

        let mut outcome = build_outcome(capture, started.elapsed(), settings.task_timeout);
        info!(
            "Task for project '{}' finished: {:?} in {}ms (${:.4})",
            name, outcome.kind, outcome.duration_ms, outcome.cost_usd
        );

        let record = TaskRecord {
            prompt,
            result_text: outcome.text.clone(),
            success: outcome.success,
            duration_ms: outcome.duration_ms,
            num_turns: outcome.num_turns,
            cost_usd: outcome.cost_usd,
            exit_code: outcome.exit_code,
        };
        // Only the handle owner writes the status. A cancelled run has lost its handle
        // and a retry may own the project by now.
        let status = self
            .inner
            .owns(&name, run_id)
            .then(|| outcome.kind.project_status());
        match store.record_task_result(&project.id, &record, status).await {
            Ok(task) => outcome.task_id = Some(task.id),
            Err(e) => error!("Failed to record task result for '{}': {}", name, e),
        }
        drop(reservation);

        let project = match store.get_project_by_id(&project.id).await {
            Ok(Some(updated)) => updated,
            _ => project,
        };
        Ok((outcome, project))
    }

    async fn supervise(
        &self,
        stream: ExecStream,
        cancel: &CancellationToken,
        observer: &dyn TaskObserver,
    ) -> RunCapture {
        let ExecStream {
            mut output,
            mut exit_code,
            abort,
        } = stream;
        let mut state = StreamState::new(
            self.inner.settings.progress_interval,
            self.inner.settings.stderr_limit,
        );

        let deadline = tokio::time::sleep(self.inner.settings.task_timeout);
        tokio::pin!(deadline);

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break RunEnd::Cancelled,
                _ = &mut deadline => break RunEnd::TimedOut,
                chunk = output.recv() => match chunk {
                    Some(chunk) => state.on_chunk(&chunk, observer),
                    None => break RunEnd::Exited,
                },
            }
        };

        let exit = match end {
            RunEnd::Exited => {
                state.finish(observer);
                match tokio::time::timeout(EXIT_CODE_WAIT, &mut exit_code).await {
                    Ok(Ok(code)) => code,
                    _ => None,
                }
            }
            RunEnd::TimedOut | RunEnd::Cancelled => None,
        };
        abort.abort();

        RunCapture {
            end,
            result: state.result,
            stderr: state.stderr.to_string_lossy(),
            exit_code: exit,
        }
    }
}

/// Incremental view of one run's output
struct StreamState {
    lines: LineBuffer,
    stderr: TailBuffer,
    result: Option<ResultEvent>,
    last_progress: Option<Instant>,
    progress_interval: Duration,
}

impl StreamState {
    fn new(progress_interval: Duration, stderr_limit: usize) -> Self {
        Self {
            lines: LineBuffer::new(),
            stderr: TailBuffer::new(stderr_limit),
            result: None,
            last_progress: None,
            progress_interval,
        }
    }

    fn on_chunk(&mut self, chunk: &OutputChunk, observer: &dyn TaskObserver) {
        match chunk.stream {
            StreamType::Stdout => {
                for line in self.lines.push(&chunk.data) {
                    self.on_line(&line, observer);
                }
            }
            StreamType::Stderr => self.stderr.push(&chunk.data),
        }
    }

    fn finish(&mut self, observer: &dyn TaskObserver) {
        if let Some(line) = self.lines.finish() {
            self.on_line(&line, observer);
        }
    }

    fn on_line(&mut self, line: &str, observer: &dyn TaskObserver) {
        match parse_line(line) {
            Some(StreamEvent::Result(result)) => self.result = Some(result),
            Some(StreamEvent::Assistant { text }) if !text.is_empty() => {
                debug!("Agent: {}", text);
                let due = self
                    .last_progress
                    .map_or(true, |at| at.elapsed() >= self.progress_interval);
                if due {
                    observer.on_progress(&text);
                    self.last_progress = Some(Instant::now());
                }
            }
            Some(StreamEvent::System { subtype }) => debug!("Agent session event: {}", subtype),
            _ => {}
        }
    }
}

/// Byte buffer keeping only the last `limit` bytes
struct TailBuffer {
    data: Vec<u8>,
    limit: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
        }
    }

    fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn build_outcome(capture: RunCapture, elapsed: Duration, timeout: Duration) -> TaskOutcome {
    let RunCapture {
        end,
        result,
        stderr,
        exit_code,
    } = capture;

    let elapsed_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
    let (duration_ms, num_turns, cost_usd) = match &result {
        Some(r) if r.duration_ms > 0 => (r.duration_ms, r.num_turns, r.cost_usd),
        Some(r) => (elapsed_ms, r.num_turns, r.cost_usd),
        None => (elapsed_ms, 0, 0.0),
    };
    let stderr = stderr.trim();

    let (kind, text) = match end {
        RunEnd::Cancelled => (TaskOutcomeKind::Cancelled, CANCELLED_MESSAGE.to_string()),
        RunEnd::TimedOut => (
            TaskOutcomeKind::TimedOut,
            format!("Task timed out after {}", describe_duration(timeout)),
        ),
        RunEnd::Exited if exit_code == Some(OOM_EXIT_CODE) => (
            TaskOutcomeKind::OomKilled,
            "The agent was killed (exit code 137), most likely because the sandbox ran out of \
             memory. Try a smaller task or raise the sandbox memory limit."
                .to_string(),
        ),
        RunEnd::Exited => match &result {
            Some(r) if !r.is_error => (TaskOutcomeKind::Completed, r.text.clone()),
            Some(r) if !r.text.is_empty() => (TaskOutcomeKind::Failed, r.text.clone()),
            Some(r) => (
                TaskOutcomeKind::Failed,
                if stderr.is_empty() {
                    format!("Agent reported an error ({})", r.subtype)
                } else {
                    stderr.to_string()
                },
            ),
            None if !stderr.is_empty() => (TaskOutcomeKind::Failed, stderr.to_string()),
            None => (TaskOutcomeKind::Failed, "Task produced no output".to_string()),
        },
    };

    TaskOutcome {
        success: kind == TaskOutcomeKind::Completed,
        kind,
        text,
        duration_ms,
        num_turns,
        cost_usd,
        exit_code,
        task_id: None,
    }
}

fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else if secs > 0 {
        format!("{} seconds", secs)
    } else {
        format!("{} ms", duration.as_millis())
    }
}
