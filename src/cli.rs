//! Command-line interface for cjr, built on clap.
//!
//! Two subcommands: `record` reports a task status, `query` reads recorded
//! jobs and tasks. Global flags select the database and log verbosity.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

use crate::error::RecorderError;
use crate::report::DateFormat;
use crate::state_machine::{TaskKey, TaskStatus};

/// cjr: record and query the progress of compute jobs.
#[derive(Debug, Parser)]
#[command(name = "cjr", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Database file to use, overriding CJR_DB and the configuration file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Enable debug logging on stderr.
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record that a task has started, made progress, or finished.
    Record(RecordArgs),

    /// Query recorded jobs and tasks.
    Query(QueryArgs),
}

/// Status argument accepted on the command line, mapped to [`TaskStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    #[value(name = "START")]
    Start,
    #[value(name = "UPDATE")]
    Update,
    #[value(name = "FINISH")]
    Finish,
}

impl From<StatusArg> for TaskStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Start => TaskStatus::Start,
            StatusArg::Update => TaskStatus::Update,
            StatusArg::Finish => TaskStatus::Finish,
        }
    }
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Status being reported.
    #[arg(short, long, ignore_case = true)]
    pub status: StatusArg,

    /// Job name, shared by a group of tasks.
    #[arg(short, long)]
    pub jobname: String,

    /// Task ID, unique within the job for a given version.
    #[arg(short, long)]
    pub taskid: String,

    /// Version of the task, for re-running a task under the same ID.
    #[arg(short, long, default_value_t = 0)]
    pub version: i64,

    /// JSON payload stored with the status: run parameters for START,
    /// progress for UPDATE, completion details for FINISH.
    #[arg(short, long)]
    pub info: String,

    /// Print progress to the terminal.
    #[arg(short, long, default_value_t = false)]
    pub progress: bool,
}

impl RecordArgs {
    pub fn task_key(&self) -> TaskKey {
        TaskKey::new(&self.jobname, &self.taskid, self.version)
    }

    /// Parses `--info` into the payload handed to the recorder.
    pub fn task_info(&self) -> Result<Value, RecorderError> {
        serde_json::from_str(&self.info).map_err(|err| {
            RecorderError::MalformedInput(format!("--info is not valid JSON: {err}"))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryKind {
    /// List job names.
    #[value(name = "JOBS")]
    Jobs,
    /// List the versions recorded for a job.
    #[value(name = "VERSIONS")]
    Versions,
    /// All tasks of a job version.
    #[value(name = "ALLTASKS")]
    AllTasks,
    /// Tasks of a job version that have not finished.
    #[value(name = "INCOMPLETE")]
    Incomplete,
    /// A single task version.
    #[value(name = "TASK")]
    Task,
    /// Every recorded version of a task ID.
    #[value(name = "TASKVERSIONS")]
    TaskVersions,
}

impl QueryKind {
    pub fn name(self) -> &'static str {
        match self {
            QueryKind::Jobs => "JOBS",
            QueryKind::Versions => "VERSIONS",
            QueryKind::AllTasks => "ALLTASKS",
            QueryKind::Incomplete => "INCOMPLETE",
            QueryKind::Task => "TASK",
            QueryKind::TaskVersions => "TASKVERSIONS",
        }
    }

    /// Usage text printed by `--queryhelp`.
    pub fn help(self) -> &'static str {
        match self {
            QueryKind::Jobs => "JOBS: prints a list of job names.\n\tDoes not require any inputs.",
            QueryKind::Versions => {
                "VERSIONS: prints the versions recorded for a job name.\n\
                 \tProvide:\n\
                 \t\t--jobname <string>"
            }
            QueryKind::AllTasks => {
                "ALLTASKS: prints all tasks associated with a job name and version.\n\
                 \tProvide:\n\
                 \t\t--jobname <string>\n\
                 \t\t--version <integer>"
            }
            QueryKind::Incomplete => {
                "INCOMPLETE: prints all uncompleted tasks associated with a job name and version.\n\
                 \tProvide:\n\
                 \t\t--jobname <string>\n\
                 \t\t--version <integer>"
            }
            QueryKind::Task => {
                "TASK: prints the task with a job name, task ID and version.\n\
                 \tProvide:\n\
                 \t\t--jobname <string>\n\
                 \t\t--taskid <string>\n\
                 \t\t--version <integer>"
            }
            QueryKind::TaskVersions => {
                "TASKVERSIONS: prints every recorded version of a task ID.\n\
                 \tProvide:\n\
                 \t\t--jobname <string>\n\
                 \t\t--taskid <string>"
            }
        }
    }
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Query to run.
    #[arg(short, long, ignore_case = true, required_unless_present = "queryhelp")]
    pub query: Option<QueryKind>,

    /// Job name to query.
    #[arg(short, long)]
    pub jobname: Option<String>,

    /// Task ID to query.
    #[arg(short, long)]
    pub taskid: Option<String>,

    /// Version to query.
    #[arg(short, long, default_value_t = 0)]
    pub version: i64,

    /// Render timestamps as year/month/day/hour/minute/second objects.
    #[arg(long, default_value_t = false)]
    pub structured_dates: bool,

    /// Print usage for the query (or all queries) instead of running it.
    #[arg(long, default_value_t = false)]
    pub queryhelp: bool,
}

impl QueryArgs {
    pub fn date_format(&self) -> DateFormat {
        if self.structured_dates {
            DateFormat::Structured
        } else {
            DateFormat::Native
        }
    }

    /// The `--jobname` value, required by every query except JOBS.
    pub fn require_jobname(&self, kind: QueryKind) -> Result<&str, RecorderError> {
        self.jobname
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                RecorderError::MalformedInput(format!("{} query requires --jobname", kind.name()))
            })
    }

    pub fn require_taskid(&self, kind: QueryKind) -> Result<&str, RecorderError> {
        self.taskid
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                RecorderError::MalformedInput(format!("{} query requires --taskid", kind.name()))
            })
    }

    /// Help text for `--queryhelp`: the selected query, or all of them.
    pub fn help_text(&self) -> String {
        match self.query {
            Some(kind) => kind.help().to_string(),
            None => QueryKind::value_variants()
                .iter()
                .map(|kind| kind.help())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
