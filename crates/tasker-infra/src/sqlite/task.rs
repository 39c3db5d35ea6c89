//! SQLite task repository implementation.
//!
//! Implements `TaskRepository` from `tasker-core` using sqlx with split
//! read/write pools. `payload` and `args` are stored as JSON text; the empty
//! status is stored as `''` and selected by `find_due` like `todo`.
//!
//! `find_due` compares due times through `julianday()`, which accepts any
//! RFC 3339 offset. A due row that fails to decode is logged and skipped.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use tasker_core::repository::task::TaskRepository;
use tasker_types::error::RepositoryError;
use tasker_types::task::{NewTask, TaskId, TaskInstance, TaskStatus};

use super::pool::DatabasePool;

const TASK_COLUMNS: &str =
    "id, name, current_step, status, retry_count, due_at, created_at, payload, args";

/// SQLite-backed implementation of `TaskRepository`.
pub struct SqliteTaskRepository {
    pool: DatabasePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct TaskRow {
    id: String,
    name: String,
    current_step: String,
    status: String,
    retry_count: i64,
    due_at: String,
    created_at: String,
    payload: Option<String>,
    args: Option<String>,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            current_step: row.try_get("current_step")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            due_at: row.try_get("due_at")?,
            created_at: row.try_get("created_at")?,
            payload: row.try_get("payload")?,
            args: row.try_get("args")?,
        })
    }

    fn into_task(self) -> Result<TaskInstance, RepositoryError> {
        let id = self
            .id
            .parse::<TaskId>()
            .map_err(|e| RepositoryError::Query(format!("invalid task id: {e}")))?;

        let status = match self.status.as_str() {
            "" => None,
            s => Some(
                s.parse::<TaskStatus>()
                    .map_err(RepositoryError::Query)?,
            ),
        };

        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| RepositoryError::Query(format!("invalid retry_count: {}", self.retry_count)))?;

        Ok(TaskInstance {
            id,
            name: self.name,
            current_step: self.current_step,
            status,
            retry_count,
            due_at: parse_datetime(&self.due_at)?,
            created_at: parse_datetime(&self.created_at)?,
            payload: parse_json(self.payload.as_deref(), "payload")?,
            args: parse_json(self.args.as_deref(), "args")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC form with microseconds and a `Z` suffix.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json(s: Option<&str>, column: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
    s.map(|s| {
        serde_json::from_str(s)
            .map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
    })
    .transpose()
}

fn to_json(value: Option<&serde_json::Value>) -> Result<Option<String>, RepositoryError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(e.to_string()))
}

fn status_str(status: Option<TaskStatus>) -> String {
    status.map(|s| s.to_string()).unwrap_or_default()
}

fn rows_to_tasks(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<TaskInstance>, RepositoryError> {
    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let r = TaskRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        tasks.push(r.into_task()?);
    }
    Ok(tasks)
}

/// Lenient decoding for the scheduler's poll: undecodable rows are dropped.
fn decode_due_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Vec<TaskInstance> {
    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let decoded = TaskRow::from_row(row)
            .map_err(|e| RepositoryError::Query(e.to_string()))
            .and_then(TaskRow::into_task);
        match decoded {
            Ok(task) => tasks.push(task),
            Err(e) => {
                let id: String = row.try_get("id").unwrap_or_default();
                tracing::error!(task_id = id.as_str(), error = %e, "skipping undecodable due task");
            }
        }
    }
    tasks
}

// ---------------------------------------------------------------------------
// TaskRepository impl
// ---------------------------------------------------------------------------

impl TaskRepository for SqliteTaskRepository {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<TaskInstance>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status IN ('', 'todo') AND julianday(due_at) <= julianday(?) \
             ORDER BY julianday(due_at) ASC"
        ))
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(decode_due_rows(&rows))
    }

    async fn save(&self, task: &TaskInstance) -> Result<(), RepositoryError> {
        let payload = to_json(task.payload.as_ref())?;
        let args = to_json(task.args.as_ref())?;

        sqlx::query(
            r#"INSERT INTO tasks (id, name, current_step, status, retry_count, due_at, created_at, payload, args)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 current_step = excluded.current_step,
                 status = excluded.status,
                 retry_count = excluded.retry_count,
                 due_at = excluded.due_at,
                 payload = excluded.payload"#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(&task.current_step)
        .bind(status_str(task.status))
        .bind(i64::from(task.retry_count))
        .bind(format_datetime(&task.due_at))
        .bind(format_datetime(&task.created_at))
        .bind(&payload)
        .bind(&args)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            task_id = %task.id,
            step = task.current_step.as_str(),
            status = %status_str(task.status),
            retry_count = task.retry_count,
            "saved task"
        );
        Ok(())
    }

    async fn create(&self, new: NewTask) -> Result<TaskInstance, RepositoryError> {
        if new.name.is_empty() {
            return Err(RepositoryError::InvalidInput("task name must not be empty".to_string()));
        }

        let mut task = TaskInstance::new(new.name, new.due_at.unwrap_or_else(Utc::now));
        task.args = new.args;
        task.payload = new.payload;

        let payload = to_json(task.payload.as_ref())?;
        let args = to_json(task.args.as_ref())?;

        sqlx::query(
            r#"INSERT INTO tasks (id, name, current_step, status, retry_count, due_at, created_at, payload, args)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(&task.current_step)
        .bind(status_str(task.status))
        .bind(i64::from(task.retry_count))
        .bind(format_datetime(&task.due_at))
        .bind(format_datetime(&task.created_at))
        .bind(&payload)
        .bind(&args)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                RepositoryError::Conflict(format!("task {} already exists", task.id))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        tracing::info!(task_id = %task.id, task = task.name.as_str(), due_at = %task.due_at, "enqueued task");
        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskInstance>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TaskRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_task()?))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<TaskInstance>, RepositoryError> {
        let rows = match status {
            // The empty status reads as todo.
            Some(TaskStatus::Todo) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ('', 'todo') ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            Some(s) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(s.to_string())
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_tasks(&rows)
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
