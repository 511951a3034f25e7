mod status;
mod task;

pub use status::TaskStatus;
pub use task::{TaskKey, TaskRecord, UpdateLog, format_timestamp, parse_timestamp};
