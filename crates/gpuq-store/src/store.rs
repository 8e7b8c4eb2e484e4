//! SQLite-backed task store

use chrono::{DateTime, SecondsFormat, Utc};
use gpuq_core::{
    join_gpu_indices, parse_gpu_indices, GpuqError, GpuqResult, NewTask, Task, TaskStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Partial update applied to a stored task
///
/// Outer `None` leaves a column untouched; for nullable columns the inner
/// `Option` distinguishes "set" from "clear".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_gpus: Option<Vec<u32>>,
    pub session_name: Option<Option<String>>,
    pub log_path: Option<Option<PathBuf>>,
    pub exit_code: Option<Option<i64>>,
    pub error: Option<Option<String>>,
}

impl TaskPatch {
    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
            && self.assigned_gpus.is_none()
            && self.session_name.is_none()
            && self.log_path.is_none()
            && self.exit_code.is_none()
            && self.error.is_none()
    }
}

/// Durable task store over an embedded SQLite database
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (creating if missing) the store at `path` and run migrations
    pub async fn open(path: &Path) -> GpuqResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(options).await
    }

    /// In-memory store for tests
    pub async fn open_in_memory() -> GpuqResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(store_err)?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> GpuqResult<Self> {
        // One connection: the store is single-writer by construction, and the
        // pool never drops it (an in-memory database dies with its connection).
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert a new task as `queued`, assigning the next monotonic id
    pub async fn insert(&self, new: &NewTask) -> GpuqResult<Task> {
        let created_at = format_ts(&Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, gpu_type, gpu_count, command, status, created_at, assigned_gpus)
            VALUES (?, ?, ?, ?, ?, ?, '')
            "#,
        )
        .bind(&new.name)
        .bind(&new.gpu_type)
        .bind(new.gpu_count as i64)
        .bind(&new.command)
        .bind(TaskStatus::Queued.to_string())
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let id = result.last_insert_rowid();
        debug!(task_id = id, "Inserted task");
        self.get(id)
            .await?
            .ok_or_else(|| GpuqError::Store(format!("task {} vanished after insert", id)))
    }

    /// Apply a partial update to one task
    pub async fn update(&self, id: i64, patch: TaskPatch) -> GpuqResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET ");
        {
            let mut sets = builder.separated(", ");
            if let Some(status) = &patch.status {
                sets.push("status = ");
                sets.push_bind_unseparated(status.to_string());
            }
            if let Some(started_at) = &patch.started_at {
                sets.push("started_at = ");
                sets.push_bind_unseparated(format_ts(started_at));
            }
            if let Some(completed_at) = &patch.completed_at {
                sets.push("completed_at = ");
                sets.push_bind_unseparated(format_ts(completed_at));
            }
            if let Some(assigned) = &patch.assigned_gpus {
                sets.push("assigned_gpus = ");
                sets.push_bind_unseparated(join_gpu_indices(assigned));
            }
            if let Some(session_name) = &patch.session_name {
                sets.push("session_name = ");
                sets.push_bind_unseparated(session_name.clone());
            }
            if let Some(log_path) = &patch.log_path {
                sets.push("log_path = ");
                sets.push_bind_unseparated(
                    log_path.as_ref().map(|p| p.display().to_string()),
                );
            }
            if let Some(exit_code) = &patch.exit_code {
                sets.push("exit_code = ");
                sets.push_bind_unseparated(*exit_code);
            }
            if let Some(error) = &patch.error {
                sets.push("error = ");
                sets.push_bind_unseparated(error.clone());
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(GpuqError::NotFound(id));
        }
        Ok(())
    }

    pub async fn get(&self, id: i64) -> GpuqResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    /// Every task, newest first
    pub async fn list_all(&self) -> GpuqResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(task_from_row).collect()
    }

    /// Tasks in one status, in submission (id) order
    pub async fn list_by_status(&self, status: TaskStatus) -> GpuqResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY id ASC")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(task_from_row).collect()
    }

    /// Tasks that were running when the process last stopped
    pub async fn load_running(&self) -> GpuqResult<Vec<Task>> {
        self.list_by_status(TaskStatus::Running).await
    }
}

async fn migrate(pool: &SqlitePool) -> GpuqResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            gpu_type TEXT NOT NULL,
            gpu_count INTEGER NOT NULL,
            command TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            session_name TEXT,
            assigned_gpus TEXT NOT NULL DEFAULT '',
            log_path TEXT,
            exit_code INTEGER,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(store_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
        .execute(pool)
        .await
        .map_err(store_err)?;

    Ok(())
}

fn task_from_row(row: &SqliteRow) -> GpuqResult<Task> {
    let status_raw: String = row.try_get("status").map_err(store_err)?;
    let status = TaskStatus::from_str(&status_raw).map_err(GpuqError::Store)?;

    let created_at_raw: String = row.try_get("created_at").map_err(store_err)?;
    let created_at = parse_ts(&created_at_raw)
        .ok_or_else(|| GpuqError::Store(format!("bad created_at '{}'", created_at_raw)))?;

    let assigned_raw: String = row.try_get("assigned_gpus").map_err(store_err)?;
    let log_path: Option<String> = row.try_get("log_path").map_err(store_err)?;

    Ok(Task {
        id: row.try_get("id").map_err(store_err)?,
        name: row.try_get("name").map_err(store_err)?,
        gpu_type: row.try_get("gpu_type").map_err(store_err)?,
        gpu_count: row.try_get::<i64, _>("gpu_count").map_err(store_err)? as u32,
        command: row.try_get("command").map_err(store_err)?,
        status,
        created_at,
        started_at: opt_ts(row, "started_at")?,
        completed_at: opt_ts(row, "completed_at")?,
        assigned_gpus: parse_gpu_indices(&assigned_raw),
        session_name: row.try_get("session_name").map_err(store_err)?,
        log_path: log_path.map(PathBuf::from),
        exit_code: row.try_get("exit_code").map_err(store_err)?,
        error: row.try_get("error").map_err(store_err)?,
    })
}

fn opt_ts(row: &SqliteRow, column: &str) -> GpuqResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column).map_err(store_err)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .ok_or_else(|| GpuqError::Store(format!("bad {} '{}'", column, raw))),
    }
}

/// Fixed-width RFC-3339 so lexicographic text order equals time order
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn store_err(err: sqlx::Error) -> GpuqError {
    GpuqError::Store(err.to_string())
}
