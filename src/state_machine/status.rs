use std::fmt;

/// The three progress reports a client can make for a task.
///
/// A task flows through: START → UPDATE* → FINISH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Start,
    Update,
    Finish,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Start => write!(f, "START"),
            TaskStatus::Update => write!(f, "UPDATE"),
            TaskStatus::Finish => write!(f, "FINISH"),
        }
    }
}
