use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use fastocr_core::{epoch_seconds, TaskRecord, TaskState};

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of the task ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntry {
    pub task_id: String,
    pub original_filename: String,
    pub upload_path: String,
    pub state: TaskState,
    pub created_at: f64,
    pub updated_at: f64,
}

/// SQLite-backed record of each task's lifecycle state.
///
/// Shared by the server (which inserts `queued` rows before publishing and
/// forgets them when the publish fails) and every worker process (which
/// advances them).
pub struct TaskLedger {
    conn: Mutex<Connection>,
}

impl TaskLedger {
    /// Open or create the ledger at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open task ledger: {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        info!(path = %path.display(), "Task ledger opened");
        Ok(ledger)
    }

    /// Create an in-memory ledger (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                original_filename TEXT NOT NULL,
                upload_path TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);",
        )?;
        Ok(())
    }

    /// Record a task that is about to be published.
    pub fn record_queued(&self, task: &TaskRecord) -> Result<()> {
        let now = epoch_seconds();
        self.conn().execute(
            "INSERT OR IGNORE INTO tasks
                (task_id, original_filename, upload_path, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.task_id,
                task.original_filename,
                task.image_path,
                TaskState::Queued.as_str(),
                task.timestamp,
                now,
            ],
        )?;
        debug!(task_id = %task.task_id, "Ledger: queued");
        Ok(())
    }

    /// Drop a task that never reached the broker. Only `queued` rows go, so
    /// a task a worker has already picked up is left alone.
    ///
    /// Returns whether a row was removed.
    pub fn forget(&self, task_id: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM tasks WHERE task_id = ?1 AND state = 'queued'",
            params![task_id],
        )?;
        debug!(task_id = %task_id, removed, "Ledger: forget");
        Ok(removed > 0)
    }

    /// Move a task to `state`. Terminal states are final: a redelivered
    /// message cannot drag a finished task back to `processing`.
    ///
    /// Returns whether a row changed.
    pub fn set_state(&self, task_id: &str, state: TaskState) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE tasks SET state = ?2, updated_at = ?3
             WHERE task_id = ?1 AND state NOT IN ('completed', 'failed')",
            params![task_id, state.as_str(), epoch_seconds()],
        )?;
        debug!(task_id = %task_id, state = %state, changed, "Ledger: state update");
        Ok(changed > 0)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<TaskEntry>> {
        let row = self
            .conn()
            .query_row(
                "SELECT task_id, original_filename, upload_path, state, created_at, updated_at
                 FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((task_id, original_filename, upload_path, state, created_at, updated_at)) = row
        else {
            return Ok(None);
        };
        let state = state
            .parse::<TaskState>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Corrupt ledger row for task {task_id}"))?;

        Ok(Some(TaskEntry {
            task_id,
            original_filename,
            upload_path,
            state,
            created_at,
            updated_at,
        }))
    }

    /// Count tasks currently in `state`.
    pub fn count(&self, state: TaskState) -> Result<usize> {
        let count: usize = self.conn().query_row(
            "SELECT COUNT(*) FROM tasks WHERE state = ?1",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
