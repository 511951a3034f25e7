use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::RecorderError;

/// Progress payloads keyed by the RFC 3339 timestamp of the update.
///
/// Keys use a fixed UTC microsecond format, so lexical order is time order.
pub type UpdateLog = BTreeMap<String, Value>;

/// Composite identity of a task: job name, task ID and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKey {
    pub job_name: String,
    pub task_id: String,
    pub version: i64,
}

impl TaskKey {
    pub fn new(job_name: impl Into<String>, task_id: impl Into<String>, version: i64) -> Self {
        Self {
            job_name: job_name.into(),
            task_id: task_id.into(),
            version,
        }
    }

    /// Rejects blank job names and task IDs.
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.job_name.trim().is_empty() {
            return Err(RecorderError::MalformedInput(
                "job name must not be empty".to_string(),
            ));
        }
        if self.task_id.trim().is_empty() {
            return Err(RecorderError::MalformedInput(
                "task ID must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} v{}", self.job_name, self.task_id, self.version)
    }
}

/// A task row as persisted by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub key: TaskKey,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub params: Value,
    pub updates: UpdateLog,
    pub end_info: Option<Value>,
    pub completed: bool,
}

impl TaskRecord {
    /// A freshly started task: parameters set, nothing logged, not completed.
    pub fn started(key: TaskKey, params: Value, now: DateTime<Utc>) -> Self {
        Self {
            key,
            start_time: now,
            end_time: None,
            params,
            updates: UpdateLog::new(),
            end_info: None,
            completed: false,
        }
    }

    /// Appends one progress payload to the update log and returns its key.
    ///
    /// Fails with [`RecorderError::TaskAlreadyFinished`] once the task is
    /// completed. Existing entries are never touched: if `now` does not sort
    /// after the newest entry, the key is moved one microsecond past it.
    pub fn apply_update(
        &mut self,
        info: Value,
        now: DateTime<Utc>,
    ) -> Result<String, RecorderError> {
        if self.completed {
            return Err(RecorderError::TaskAlreadyFinished(self.key.clone()));
        }

        let mut key = format_timestamp(now);
        if let Some(last) = self.updates.keys().next_back()
            && key <= *last
        {
            let last = parse_timestamp(last)?;
            key = format_timestamp(last + Duration::microseconds(1));
        }

        self.updates.insert(key.clone(), info);
        Ok(key)
    }

    /// Marks the task completed with its end time and end info.
    ///
    /// A task that is already completed is finished again: end time and end
    /// info are overwritten.
    pub fn apply_finish(&mut self, info: Value, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.end_info = Some(info);
        self.completed = true;
    }
}

/// Formats a timestamp the way it is stored and used as an update log key.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, RecorderError> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}
