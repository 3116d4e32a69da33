// ABOUTME: ProjectStore - the durable record of projects and their task history
// ABOUTME: Name-unique creation with per-user quota, snapshots, cost accumulation and soft delete

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use codebox_core::{
    validate_project_name, PathTranslator, Project, ProjectStatus, Task, TaskRecord,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};

const PROJECT_COLUMNS: &str = "id, name, status, user_id, last_task_prompt, last_task_result, \
     last_task_duration_ms, last_task_turns, last_task_cost_usd, total_cost_usd, created_at, updated_at";

const TASK_COLUMNS: &str =
    "id, project_id, prompt, result_text, success, duration_ms, num_turns, cost_usd, exit_code, created_at";

/// SQLite-backed store for projects and their append-only task history.
///
/// Every write completes before the method returns; callers never observe a
/// queued or partially applied update.
#[derive(Clone)]
pub struct ProjectStore {
    pool: SqlitePool,
    workspace: PathTranslator,
    max_projects: usize,
}

impl ProjectStore {
    /// `workspace_root` is the local directory under which each project gets
    /// its own working directory.
    pub fn new(pool: SqlitePool, workspace_root: impl Into<PathBuf>, max_projects: usize) -> Self {
        Self::with_translator(pool, PathTranslator::identity(workspace_root), max_projects)
    }

    /// Like [`Self::new`], keeping the daemon's view of the workspace for callers
    /// that need mount paths
    pub fn with_translator(pool: SqlitePool, workspace: PathTranslator, max_projects: usize) -> Self {
        Self {
            pool,
            workspace,
            max_projects,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace.local_root()
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.workspace
    }

    /// Working directory of a project as this process sees it
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.workspace.project_dir(name)
    }

    /// Creates a project and its working directory.
    ///
    /// Fails with `AlreadyExists` if a non-deleted project has the same name and
    /// with `QuotaExceeded` once the user owns `max_projects` live projects.
    pub async fn create_project(&self, name: &str, user_id: &str) -> Result<Project> {
        validate_project_name(name)?;

        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM projects WHERE name = ? AND status != 'deleted'",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;
        if existing > 0 {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM projects WHERE user_id = ? AND status != 'deleted'",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if owned as usize >= self.max_projects {
            return Err(StorageError::QuotaExceeded {
                user_id: user_id.to_string(),
                limit: self.max_projects,
            });
        }

        let id = format!("prj_{}", uuid::Uuid::new_v4().to_string().replace('-', ""));
        let now = timestamp(Utc::now());

        let inserted = sqlx::query(
            r#"
            INSERT INTO projects (id, name, status, user_id, total_cost_usd, created_at, updated_at)
            VALUES (?, ?, 'active', ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StorageError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(StorageError::Database(e)),
        }

        // Directory first so a failure leaves no row behind
        let dir = self.project_dir(name);
        tokio::fs::create_dir_all(&dir).await?;

        tx.commit().await?;

        info!("Created project '{}' ({}) for user {}", name, id, user_id);
        debug!("Project directory: {}", dir.display());

        self.get_project_by_id(&id)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    /// Live project by name; soft-deleted projects are invisible here
    pub async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE name = ? AND status != 'deleted'",
            PROJECT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_project(&r)).transpose()
    }

    /// Project by id, including soft-deleted ones
    pub async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE id = ?",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_project(&r)).transpose()
    }

    /// Live projects, most recently updated first
    pub async fn list_projects(&self, user_id: Option<&str>) -> Result<Vec<Project>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM projects WHERE status != 'deleted' AND user_id = ? \
                     ORDER BY updated_at DESC, rowid DESC",
                    PROJECT_COLUMNS
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM projects WHERE status != 'deleted' \
                     ORDER BY updated_at DESC, rowid DESC",
                    PROJECT_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_project).collect()
    }

    /// Sets the status of a live project. Deletion goes through [`Self::soft_delete`].
    pub async fn update_status(&self, name: &str, status: ProjectStatus) -> Result<()> {
        if status == ProjectStatus::Deleted {
            return Err(StorageError::InvalidStatus(
                "use soft_delete to delete a project".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE projects SET status = ?, updated_at = ? WHERE name = ? AND status != 'deleted'",
        )
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(name.to_string()));
        }

        debug!("Project '{}' status -> {}", name, status);
        Ok(())
    }

    /// Appends a task row and folds it into the project snapshot in one transaction.
    ///
    /// `status` is the project's status after the run; `None` leaves it as it is,
    /// for runs that no longer own the project. A project deleted while the run
    /// was in flight stays deleted; its history still gains the row.
    pub async fn record_task_result(
        &self,
        project_id: &str,
        record: &TaskRecord,
        status: Option<ProjectStatus>,
    ) -> Result<Task> {
        let cost = if record.cost_usd.is_finite() {
            record.cost_usd.max(0.0)
        } else {
            0.0
        };
        let now = Utc::now();
        let task_id = format!("tsk_{}", uuid::Uuid::new_v4().to_string().replace('-', ""));

        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::NotFound(project_id.to_string()));
        }

        sqlx::query(&format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TASK_COLUMNS
        ))
        .bind(&task_id)
        .bind(project_id)
        .bind(&record.prompt)
        .bind(&record.result_text)
        .bind(record.success)
        .bind(record.duration_ms)
        .bind(record.num_turns)
        .bind(cost)
        .bind(record.exit_code)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE projects SET
                last_task_prompt = ?,
                last_task_result = ?,
                last_task_duration_ms = ?,
                last_task_turns = ?,
                last_task_cost_usd = ?,
                total_cost_usd = total_cost_usd + ?,
                status = CASE WHEN status = 'deleted' THEN 'deleted' ELSE COALESCE(?, status) END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.prompt)
        .bind(&record.result_text)
        .bind(record.duration_ms)
        .bind(record.num_turns)
        .bind(cost)
        .bind(cost)
        .bind(status.map(|s| s.as_str()))
        .bind(timestamp(now))
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Recorded task {} for project {} (success: {}, cost: ${:.4})",
            task_id, project_id, record.success, cost
        );

        Ok(Task {
            id: task_id,
            project_id: project_id.to_string(),
            prompt: record.prompt.clone(),
            result_text: record.result_text.clone(),
            success: record.success,
            duration_ms: record.duration_ms,
            num_turns: record.num_turns,
            cost_usd: cost,
            exit_code: record.exit_code,
            created_at: now,
        })
    }

    /// Marks a live project deleted. Its task rows and working directory are kept.
    pub async fn soft_delete(&self, name: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE projects SET status = 'deleted', updated_at = ? WHERE name = ? AND status != 'deleted'",
        )
        .bind(timestamp(Utc::now()))
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(name.to_string()));
        }

        info!("Deleted project '{}'", name);
        Ok(())
    }

    /// Moves every `running` project to `error` and returns how many changed.
    ///
    /// Run once at startup, before any task is admitted: nothing can be running
    /// in a process that has only just started.
    pub async fn reset_stuck_projects(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE projects SET status = 'error', updated_at = ? WHERE status = 'running'",
        )
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            warn!("Reset {} project(s) stuck in 'running' after restart", count);
        }
        Ok(count)
    }

    /// Task history of a project, oldest first. Includes deleted projects.
    pub async fn list_tasks(&self, project_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE project_id = ? ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    pub async fn count_tasks(&self, project_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp '{}': {}", value, e)))
}

fn row_to_project(row: &SqliteRow) -> Result<Project> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status
            .parse::<ProjectStatus>()
            .map_err(|_| StorageError::InvalidStatus(status.clone()))?,
        user_id: row.try_get("user_id")?,
        last_task_prompt: row.try_get("last_task_prompt")?,
        last_task_result: row.try_get("last_task_result")?,
        last_task_duration_ms: row.try_get("last_task_duration_ms")?,
        last_task_turns: row.try_get("last_task_turns")?,
        last_task_cost_usd: row.try_get("last_task_cost_usd")?,
        total_cost_usd: row.try_get("total_cost_usd")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Task {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        prompt: row.try_get("prompt")?,
        result_text: row.try_get("result_text")?,
        success: row.try_get("success")?,
        duration_ms: row.try_get("duration_ms")?,
        num_turns: row.try_get("num_turns")?,
        cost_usd: row.try_get("cost_usd")?,
        exit_code: row.try_get("exit_code")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = Utc::now();
        let b = a + chrono::Duration::microseconds(1);
        assert!(timestamp(a) < timestamp(b));
        assert_eq!(timestamp(a).len(), timestamp(b).len());
    }

    #[test]
    fn test_timestamp_parses_back() {
        let now = Utc::now();
        let parsed = parse_timestamp(&timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_garbage_timestamp_is_invalid_data() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(StorageError::InvalidData(_))
        ));
    }
}
