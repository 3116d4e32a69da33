// ABOUTME: Sandboxed coding-agent task execution for Codebox
// ABOUTME: NDJSON stream parsing, the task execution engine and the CodingService facade

pub mod command;
pub mod engine;
pub mod error;
pub mod ndjson;
pub mod service;

pub use command::build_agent_command;
pub use engine::{
    Admission, EngineSettings, TaskExecutionEngine, TaskObserver, TaskOutcome, TaskOutcomeKind,
    DISK_QUOTA_MB, PROGRESS_INTERVAL,
};
pub use error::{EngineError, Result, ServiceError};
pub use ndjson::{parse_line, LineBuffer, ResultEvent, StreamEvent};
pub use service::CodingService;
