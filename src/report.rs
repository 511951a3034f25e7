//! Reporting records: the externally visible shape of a stored task.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::state_machine::{TaskRecord, UpdateLog};

/// How timestamps are rendered in a [`TaskReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateFormat {
    /// RFC 3339 timestamp string.
    #[default]
    Native,
    /// Object with `year`, `month`, `day`, `hour`, `minute` and `second`.
    Structured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl From<DateTime<Utc>> for DateParts {
    fn from(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
            minute: at.minute(),
            second: at.second(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReportTime {
    Native(DateTime<Utc>),
    Structured(DateParts),
}

impl ReportTime {
    pub fn new(at: DateTime<Utc>, format: DateFormat) -> Self {
        match format {
            DateFormat::Native => ReportTime::Native(at),
            DateFormat::Structured => ReportTime::Structured(at.into()),
        }
    }
}

/// One task as returned by queries. `end` and `end_info` are null until the
/// task is completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub job_name: String,
    pub version: i64,
    pub start: ReportTime,
    pub end: Option<ReportTime>,
    pub params: Value,
    pub update_info: UpdateLog,
    pub end_info: Option<Value>,
    pub completed: bool,
}

impl TaskReport {
    pub fn from_record(task: TaskRecord, dates: DateFormat) -> Self {
        let (end, end_info) = if task.completed {
            (task.end_time.map(|at| ReportTime::new(at, dates)), task.end_info)
        } else {
            (None, None)
        };

        Self {
            task_id: task.key.task_id,
            job_name: task.key.job_name,
            version: task.key.version,
            start: ReportTime::new(task.start_time, dates),
            end,
            params: task.params,
            update_info: task.updates,
            end_info,
            completed: task.completed,
        }
    }
}
