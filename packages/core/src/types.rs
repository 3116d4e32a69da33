// ABOUTME: Domain types shared by storage, sandbox and executor packages
// ABOUTME: Projects, their lifecycle status, and the append-only task history records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::validation::ValidationError;

/// Lifecycle status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Idle and ready to accept a task
    Active,
    /// A task is executing (persisted so crashes can be detected)
    Running,
    /// The last task finished successfully
    Completed,
    /// The last task failed, timed out, or was interrupted by a crash
    Error,
    /// Soft-deleted; hidden from every active query
    Deleted,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "deleted" => Ok(Self::Deleted),
            _ => Err(ValidationError::new(
                "status",
                format!("Unknown project status: {}", s),
            )),
        }
    }
}

/// A named workspace owned by a single user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub user_id: String,

    // Snapshot of the most recent task, overwritten on every run
    pub last_task_prompt: Option<String>,
    pub last_task_result: Option<String>,
    pub last_task_duration_ms: Option<i64>,
    pub last_task_turns: Option<i64>,
    pub last_task_cost_usd: Option<f64>,

    /// Sum of every recorded task's cost
    pub total_cost_usd: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_deleted(&self) -> bool {
        self.status == ProjectStatus::Deleted
    }
}

/// Append-only execution record. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub prompt: String,
    pub result_text: String,
    pub success: bool,
    pub duration_ms: i64,
    pub num_turns: i64,
    pub cost_usd: f64,
    pub exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one agent run, as handed to the store for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub prompt: String,
    pub result_text: String,
    pub success: bool,
    pub duration_ms: i64,
    pub num_turns: i64,
    pub cost_usd: f64,
    pub exit_code: Option<i64>,
}
