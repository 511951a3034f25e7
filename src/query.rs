//! Read-only queries over recorded jobs and tasks.
//!
//! Each call opens its own read session and drops it before returning, so
//! results always reflect what is committed at the time of the call.

use tracing::debug;

use crate::error::RecorderError;
use crate::report::{DateFormat, TaskReport};
use crate::state_machine::{TaskKey, TaskRecord};
use crate::store::Store;

pub struct QueryService<'s> {
    store: &'s Store,
}

impl<'s> QueryService<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }

    /// All job names, in the order the jobs were first started.
    pub fn list_job_names(&self) -> Result<Vec<String>, RecorderError> {
        let names = self.store.read_session()?.job_names()?;
        debug!(count = names.len(), "listed jobs");
        Ok(names)
    }

    /// Distinct versions with at least one task under `job_name`, ascending.
    pub fn list_job_versions(&self, job_name: &str) -> Result<Vec<i64>, RecorderError> {
        self.store.read_session()?.job_versions(job_name)
    }

    pub fn list_all_tasks(
        &self,
        job_name: &str,
        version: i64,
        dates: DateFormat,
    ) -> Result<Vec<TaskReport>, RecorderError> {
        let tasks = self.store.read_session()?.tasks_for(job_name, version, false)?;
        debug!(job = job_name, version, count = tasks.len(), "listed tasks");
        Ok(to_reports(tasks, dates))
    }

    /// Tasks of a job version that have not been finished.
    pub fn list_incomplete_tasks(
        &self,
        job_name: &str,
        version: i64,
        dates: DateFormat,
    ) -> Result<Vec<TaskReport>, RecorderError> {
        let tasks = self.store.read_session()?.tasks_for(job_name, version, true)?;
        debug!(job = job_name, version, count = tasks.len(), "listed incomplete tasks");
        Ok(to_reports(tasks, dates))
    }

    /// Every recorded version of one task ID.
    pub fn list_task_versions(
        &self,
        job_name: &str,
        task_id: &str,
        dates: DateFormat,
    ) -> Result<Vec<TaskReport>, RecorderError> {
        let tasks = self.store.read_session()?.task_versions(job_name, task_id)?;
        Ok(to_reports(tasks, dates))
    }

    /// The task stored under the full key, or `None` if it was never started.
    pub fn get_task(
        &self,
        job_name: &str,
        task_id: &str,
        version: i64,
        dates: DateFormat,
    ) -> Result<Option<TaskReport>, RecorderError> {
        let key = TaskKey::new(job_name, task_id, version);
        let mut tasks = self.store.read_session()?.tasks_matching_key(&key)?;
        if tasks.len() > 1 {
            return Err(RecorderError::AmbiguousTask(key));
        }
        Ok(tasks
            .pop()
            .map(|task| TaskReport::from_record(task, dates)))
    }
}

fn to_reports(tasks: Vec<TaskRecord>, dates: DateFormat) -> Vec<TaskReport> {
    tasks
        .into_iter()
        .map(|task| TaskReport::from_record(task, dates))
        .collect()
}
