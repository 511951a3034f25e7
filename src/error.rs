use thiserror::Error;

use crate::state_machine::TaskKey;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Job database unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("The task '{0}' has already been started - change the task ID or version.")]
    DuplicateTask(TaskKey),

    #[error("The task '{0}' could not be found - check inputs.")]
    TaskNotFound(TaskKey),

    #[error("The task '{0}' has already been finished - check inputs.")]
    TaskAlreadyFinished(TaskKey),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("More than one row is stored for task '{0}'.")]
    AmbiguousTask(TaskKey),

    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}
