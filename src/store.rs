//! SQLite persistence for jobs and tasks.
//!
//! A [`Store`] owns one connection, opened once by the caller and passed to
//! the recorder and query service. All reads and writes go through a
//! [`Session`], which wraps a single transaction: `commit` makes the work
//! durable, dropping the session rolls it back.

use std::path::Path;
use std::time::Duration;

use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, ffi, params,
};
use tracing::debug;

use crate::error::RecorderError;
use crate::state_machine::{TaskKey, TaskRecord, UpdateLog, format_timestamp, parse_timestamp};

const TASK_COLUMNS: &str =
    "task_id, job_name, version, start_time, end_time, params, updates, end_info, completed";

/// Connection settings applied when a store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long to wait on another process holding the database lock.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if needed) the database file and its tables.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, RecorderError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| {
                RecorderError::ConnectionUnavailable(format!("{}: {err}", parent.display()))
            })?;
        }

        let unavailable = |err: rusqlite::Error| {
            RecorderError::ConnectionUnavailable(format!("{}: {err}", path.display()))
        };
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.busy_timeout(options.busy_timeout).map_err(unavailable)?;

        let store = Self { conn };
        // Schema creation is the first real I/O, so a bad path surfaces here.
        store.migrate().map_err(|err| match err {
            RecorderError::Sql(err) => unavailable(err),
            other => other,
        })?;
        debug!(path = %path.display(), "opened job database");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, RecorderError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| RecorderError::ConnectionUnavailable(err.to_string()))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), RecorderError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS jobs (
              name TEXT PRIMARY KEY NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
              task_id TEXT NOT NULL,
              job_name TEXT NOT NULL REFERENCES jobs(name),
              version INTEGER NOT NULL DEFAULT 0,
              start_time TEXT NOT NULL,
              end_time TEXT,
              params TEXT NOT NULL,
              updates TEXT NOT NULL DEFAULT '{}',
              end_info TEXT,
              completed INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (job_name, task_id, version)
            );
            "#,
        )?;
        Ok(())
    }

    /// Starts a write session.
    ///
    /// The database write lock is taken up front, so the lookup that
    /// validates a transition and the write that follows see the same state.
    pub fn session(&mut self) -> Result<Session<'_>, RecorderError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Session { tx })
    }

    /// Starts a read-only session; it is never committed.
    pub fn read_session(&self) -> Result<Session<'_>, RecorderError> {
        let tx = self.conn.unchecked_transaction()?;
        Ok(Session { tx })
    }
}

pub struct Session<'conn> {
    tx: Transaction<'conn>,
}

impl Session<'_> {
    pub fn commit(self) -> Result<(), RecorderError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn job_exists(&self, job_name: &str) -> Result<bool, RecorderError> {
        let found = self
            .tx
            .query_row(
                "SELECT 1 FROM jobs WHERE name = ?1",
                params![job_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_job(&self, job_name: &str) -> Result<(), RecorderError> {
        self.tx
            .execute("INSERT INTO jobs (name) VALUES (?1)", params![job_name])?;
        Ok(())
    }

    pub fn find_task(&self, key: &TaskKey) -> Result<Option<TaskRecord>, RecorderError> {
        let raw = self
            .tx
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE job_name = ?1 AND task_id = ?2 AND version = ?3"
                ),
                params![key.job_name, key.task_id, key.version],
                RawTask::from_row,
            )
            .optional()?;
        raw.map(RawTask::into_record).transpose()
    }

    /// Inserts a new task row.
    ///
    /// A primary key violation means another writer started the same task
    /// first and is reported as [`RecorderError::DuplicateTask`].
    pub fn insert_task(&self, task: &TaskRecord) -> Result<(), RecorderError> {
        let result = self.tx.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                task.key.task_id,
                task.key.job_name,
                task.key.version,
                format_timestamp(task.start_time),
                task.end_time.map(format_timestamp),
                serde_json::to_string(&task.params)?,
                serde_json::to_string(&task.updates)?,
                task.end_info.as_ref().map(serde_json::to_string).transpose()?,
                task.completed,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(RecorderError::DuplicateTask(task.key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes back the mutable columns of an existing task row.
    pub fn save_task(&self, task: &TaskRecord) -> Result<(), RecorderError> {
        let changed = self.tx.execute(
            "UPDATE tasks SET end_time = ?4, updates = ?5, end_info = ?6, completed = ?7 \
             WHERE job_name = ?1 AND task_id = ?2 AND version = ?3",
            params![
                task.key.job_name,
                task.key.task_id,
                task.key.version,
                task.end_time.map(format_timestamp),
                serde_json::to_string(&task.updates)?,
                task.end_info.as_ref().map(serde_json::to_string).transpose()?,
                task.completed,
            ],
        )?;
        if changed == 0 {
            return Err(RecorderError::TaskNotFound(task.key.clone()));
        }
        Ok(())
    }

    /// Job names in the order they were first recorded.
    pub fn job_names(&self) -> Result<Vec<String>, RecorderError> {
        let mut stmt = self.tx.prepare("SELECT name FROM jobs ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn job_versions(&self, job_name: &str) -> Result<Vec<i64>, RecorderError> {
        let mut stmt = self.tx.prepare(
            "SELECT DISTINCT version FROM tasks WHERE job_name = ?1 ORDER BY version",
        )?;
        let versions = stmt
            .query_map(params![job_name], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(versions)
    }

    /// Tasks of one job version ordered by task ID, optionally only those
    /// not yet completed.
    pub fn tasks_for(
        &self,
        job_name: &str,
        version: i64,
        incomplete_only: bool,
    ) -> Result<Vec<TaskRecord>, RecorderError> {
        let filter = if incomplete_only {
            " AND completed = 0"
        } else {
            ""
        };
        self.collect_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE job_name = ?1 AND version = ?2{filter} ORDER BY task_id"
            ),
            params![job_name, version],
        )
    }

    /// Every version recorded for one task ID, lowest version first.
    pub fn task_versions(
        &self,
        job_name: &str,
        task_id: &str,
    ) -> Result<Vec<TaskRecord>, RecorderError> {
        self.collect_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE job_name = ?1 AND task_id = ?2 ORDER BY version"
            ),
            params![job_name, task_id],
        )
    }

    /// All rows stored under a composite key. The primary key keeps this at
    /// most one row; callers check rather than assume.
    pub fn tasks_matching_key(&self, key: &TaskKey) -> Result<Vec<TaskRecord>, RecorderError> {
        self.collect_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE job_name = ?1 AND task_id = ?2 AND version = ?3"
            ),
            params![key.job_name, key.task_id, key.version],
        )
    }

    fn collect_tasks(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TaskRecord>, RecorderError> {
        let mut stmt = self.tx.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawTask::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawTask::into_record).collect()
    }
}

/// A task row exactly as SQLite returns it, before JSON and timestamp
/// decoding.
struct RawTask {
    task_id: String,
    job_name: String,
    version: i64,
    start_time: String,
    end_time: Option<String>,
    params: String,
    updates: String,
    end_info: Option<String>,
    completed: bool,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            job_name: row.get(1)?,
            version: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            params: row.get(5)?,
            updates: row.get(6)?,
            end_info: row.get(7)?,
            completed: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord, RecorderError> {
        Ok(TaskRecord {
            key: TaskKey::new(self.job_name, self.task_id, self.version),
            start_time: parse_timestamp(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_timestamp).transpose()?,
            params: serde_json::from_str(&self.params)?,
            updates: serde_json::from_str::<UpdateLog>(&self.updates)?,
            end_info: self
                .end_info
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            completed: self.completed,
        })
    }
}
