// ABOUTME: CodingService facade over the store, sandbox stack and execution engine
// ABOUTME: The single entry point a host application uses for sandboxed coding tasks

use std::sync::Arc;

use codebox_config::CodeboxConfig;
use codebox_core::{Project, Task};
use codebox_sandbox::{SandboxHealth, SandboxRuntime, SandboxStack};
use codebox_storage::ProjectStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{TaskExecutionEngine, TaskObserver, TaskOutcome};
use crate::error::{EngineError, Result, ServiceError};

pub struct CodingService {
    config: Arc<CodeboxConfig>,
    store: ProjectStore,
    stack: Arc<SandboxStack>,
    engine: TaskExecutionEngine,
}

impl CodingService {
    /// Recovers from any previous crash, then brings the sandbox stack up.
    ///
    /// Any error means the coding feature is unavailable; the host should report
    /// it and carry on without it.
    pub async fn initialize(
        config: CodeboxConfig,
        runtime: Arc<dyn SandboxRuntime>,
        store: ProjectStore,
    ) -> std::result::Result<Self, ServiceError> {
        let recovered = store.reset_stuck_projects().await?;
        if recovered > 0 {
            info!("Recovered {} project(s) interrupted by a restart", recovered);
        }

        let service = Self::connect(config, runtime, store);
        service.stack.start().await?;
        info!("Coding service ready");
        Ok(service)
    }

    /// Wires the service without recovery or stack start.
    ///
    /// For maintenance commands that must work while the stack is down and must
    /// not reset projects another process is still running.
    pub fn connect(
        config: CodeboxConfig,
        runtime: Arc<dyn SandboxRuntime>,
        store: ProjectStore,
    ) -> Self {
        let config = Arc::new(config);
        let stack = Arc::new(SandboxStack::new(runtime, config.clone()));
        let engine = TaskExecutionEngine::new(stack.clone(), store.clone(), &config);

        Self {
            config,
            store,
            stack,
            engine,
        }
    }

    pub fn config(&self) -> &CodeboxConfig {
        &self.config
    }

    pub fn engine(&self) -> &TaskExecutionEngine {
        &self.engine
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn stack(&self) -> &Arc<SandboxStack> {
        &self.stack
    }

    pub async fn create_project(&self, name: &str, user_id: &str) -> Result<Project> {
        Ok(self.store.create_project(name, user_id).await?)
    }

    /// Soft-deletes a project, cancelling its running task first
    pub async fn delete_project(&self, name: &str) -> Result<()> {
        if self.engine.is_task_running(name) {
            match self.engine.cancel_task(name).await {
                Ok(()) | Err(EngineError::NoRunningTask(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(self.store.soft_delete(name).await?)
    }

    pub async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.store.get_project(name).await?)
    }

    pub async fn list_projects(&self, user_id: Option<&str>) -> Result<Vec<Project>> {
        Ok(self.store.list_projects(user_id).await?)
    }

    /// Task history of a project by id, including projects since deleted
    pub async fn list_tasks(&self, project_id: &str) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks(project_id).await?)
    }

    /// Starts a task and returns once it is admitted
    pub async fn run_task_in_background(
        &self,
        project: &str,
        prompt: &str,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<JoinHandle<()>> {
        self.engine.start_task(project, prompt, observer).await
    }

    /// Runs a task and waits for its outcome
    pub async fn run_task(
        &self,
        project: &str,
        prompt: &str,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<TaskOutcome> {
        self.engine.run_task(project, prompt, observer).await
    }

    pub async fn cancel_task(&self, project: &str) -> Result<()> {
        self.engine.cancel_task(project).await
    }

    pub fn is_task_running(&self, project: &str) -> bool {
        self.engine.is_task_running(project)
    }

    pub fn running_task_count(&self) -> usize {
        self.engine.running_task_count()
    }

    pub async fn health_check(&self) -> Result<SandboxHealth> {
        Ok(self.stack.health(self.engine.running_task_count()).await?)
    }

    /// Replaces the agent credentials inside the running sandbox
    pub async fn push_credentials(&self, json: &str) -> Result<()> {
        Ok(self.stack.credentials().push_credentials(json).await?)
    }

    /// Cancels every running task, then removes the sandbox and proxy containers
    pub async fn destroy_sandbox(&self) -> Result<()> {
        let cancelled = self.engine.cancel_all().await;
        if cancelled > 0 {
            warn!("Cancelled {} running task(s) before teardown", cancelled);
        }
        Ok(self.stack.destroy().await?)
    }
}
