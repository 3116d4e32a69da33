// ABOUTME: Shared fixtures for executor integration tests
// ABOUTME: Builds a CodingService over an in-memory store and the scripted mock runtime

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use codebox_config::{CodeboxConfig, CredentialMode};
use codebox_core::Project;
use codebox_executor::{
    CodingService, EngineSettings, TaskExecutionEngine, TaskObserver, TaskOutcome,
};
use codebox_sandbox::mock::MockRuntime;
use codebox_storage::{connect_in_memory, ProjectStore};
use tempfile::TempDir;

pub struct Harness {
    pub runtime: Arc<MockRuntime>,
    pub service: CodingService,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut CodeboxConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, adjust);

        let pool = connect_in_memory().await.unwrap();
        let store = ProjectStore::new(
            pool,
            config.workspace.local_root.clone(),
            config.limits.max_projects,
        );
        let runtime = Arc::new(MockRuntime::new());
        let service = CodingService::initialize(config, runtime.clone(), store)
            .await
            .unwrap();

        Self {
            runtime,
            service,
            dir,
        }
    }

    /// An engine sharing this harness' stack and store, with tweaked settings
    pub fn engine_with(&self, adjust: impl FnOnce(&mut EngineSettings)) -> TaskExecutionEngine {
        let mut settings = EngineSettings::from_config(self.service.config());
        adjust(&mut settings);
        TaskExecutionEngine::with_settings(
            self.service.stack().clone(),
            self.service.store().clone(),
            self.service.config().agent.clone(),
            settings,
        )
    }

    pub async fn project(&self, name: &str) -> Project {
        self.service.get_project(name).await.unwrap().unwrap()
    }
}

pub fn test_config(dir: &TempDir, adjust: impl FnOnce(&mut CodeboxConfig)) -> CodeboxConfig {
    let dockerfile = dir.path().join("Dockerfile");
    std::fs::write(&dockerfile, "FROM node:20-slim\n").unwrap();

    let mut config = CodeboxConfig::default();
    config.sandbox.dockerfile = dockerfile;
    config.sandbox.build_context = dir.path().to_path_buf();
    config.proxy.config_dir = dir.path().join("proxy");
    config.workspace.local_root = dir.path().join("workspace");
    config.database_path = dir.path().join("codebox.db");
    config.credentials = CredentialMode::ApiKey {
        key: "sk-test".to_string(),
    };
    adjust(&mut config);
    config
}

/// Captures every callback for later assertions
#[derive(Default)]
pub struct RecordingObserver {
    pub progress: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<(TaskOutcome, Project)>>,
    pub errors: Mutex<Vec<(String, Project)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(&self) -> Vec<String> {
        self.progress.lock().unwrap().clone()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().unwrap().len()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    pub fn callback_count(&self) -> usize {
        self.completed_count() + self.errors.lock().unwrap().len()
    }
}

impl TaskObserver for RecordingObserver {
    fn on_progress(&self, text: &str) {
        self.progress.lock().unwrap().push(text.to_string());
    }

    fn on_complete(&self, outcome: &TaskOutcome, project: &Project) {
        self.completed
            .lock()
            .unwrap()
            .push((outcome.clone(), project.clone()));
    }

    fn on_error(&self, message: &str, project: &Project) {
        self.errors
            .lock()
            .unwrap()
            .push((message.to_string(), project.clone()));
    }
}

/// Polls `condition` until it holds, failing the test after two seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

pub fn assistant_line(text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
    .to_string()
}

pub fn result_line(text: &str, cost: f64) -> String {
    serde_json::json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": text,
        "duration_ms": 800,
        "num_turns": 2,
        "total_cost_usd": cost
    })
    .to_string()
}
