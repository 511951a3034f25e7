//! Applies START / UPDATE / FINISH reports to the task store.
//!
//! Every report runs in one write session: the task row is looked up, the
//! transition is validated against it, and the row is written and committed.
//! A rejected transition returns before anything is written, and the
//! uncommitted session rolls back when it is dropped.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::RecorderError;
use crate::state_machine::{TaskKey, TaskRecord, TaskStatus};
use crate::store::Store;
use crate::ui::TaskProgress;

/// Receives operator-facing progress for each report.
///
/// Output is informational only: it never changes what is stored or what
/// the recorder returns.
pub trait ProgressSink {
    fn begin(&mut self, status: TaskStatus, key: &TaskKey);
    fn succeeded(&mut self, status: TaskStatus, task: &TaskRecord);
    fn failed(&mut self, status: TaskStatus, key: &TaskKey, err: &RecorderError);
}

pub struct Recorder<'s> {
    store: &'s mut Store,
    clock: Box<dyn Fn() -> DateTime<Utc>>,
    progress: Option<Box<dyn ProgressSink>>,
}

impl<'s> Recorder<'s> {
    pub fn new(store: &'s mut Store) -> Self {
        Self {
            store,
            clock: Box::new(Utc::now),
            progress: None,
        }
    }

    /// Replaces the wall clock used for start, update and end timestamps.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Current time at the precision the store keeps, so a returned record
    /// equals the row read back later.
    fn now(clock: &dyn Fn() -> DateTime<Utc>) -> DateTime<Utc> {
        clock().trunc_subsecs(6)
    }

    /// Records one status report for `key` and returns the stored task.
    pub fn record(
        &mut self,
        status: TaskStatus,
        key: &TaskKey,
        task_info: Value,
    ) -> Result<TaskRecord, RecorderError> {
        key.validate()?;

        if let Some(progress) = self.progress.as_mut() {
            progress.begin(status, key);
        }

        let result = match status {
            TaskStatus::Start => self.start(key, task_info),
            TaskStatus::Update => self.update(key, task_info),
            TaskStatus::Finish => self.finish(key, task_info),
        };

        if let Some(progress) = self.progress.as_mut() {
            match &result {
                Ok(task) => progress.succeeded(status, task),
                Err(err) => progress.failed(status, key, err),
            }
        }
        result
    }

    fn start(&mut self, key: &TaskKey, params: Value) -> Result<TaskRecord, RecorderError> {
        let session = self.store.session()?;

        if session.find_task(key)?.is_some() {
            warn!(task = %key, "task already started");
            return Err(RecorderError::DuplicateTask(key.clone()));
        }
        if !session.job_exists(&key.job_name)? {
            session.insert_job(&key.job_name)?;
            debug!(job = %key.job_name, "registered new job");
        }

        let task = TaskRecord::started(key.clone(), params, Self::now(&self.clock));
        session.insert_task(&task)?;
        session.commit()?;

        info!(task = %key, "task started");
        Ok(task)
    }

    fn update(&mut self, key: &TaskKey, info: Value) -> Result<TaskRecord, RecorderError> {
        let session = self.store.session()?;

        let Some(mut task) = session.find_task(key)? else {
            warn!(task = %key, "update for unknown task");
            return Err(RecorderError::TaskNotFound(key.clone()));
        };
        let entry = task.apply_update(info, Self::now(&self.clock))?;
        session.save_task(&task)?;
        session.commit()?;

        info!(task = %key, entry = %entry, updates = task.updates.len(), "task updated");
        Ok(task)
    }

    fn finish(&mut self, key: &TaskKey, info: Value) -> Result<TaskRecord, RecorderError> {
        let session = self.store.session()?;

        let Some(mut task) = session.find_task(key)? else {
            warn!(task = %key, "finish for unknown task");
            return Err(RecorderError::TaskNotFound(key.clone()));
        };
        if task.completed {
            debug!(task = %key, "task finished again, overwriting end info");
        }
        task.apply_finish(info, Self::now(&self.clock));
        session.save_task(&task)?;
        session.commit()?;

        info!(task = %key, "task finished");
        Ok(task)
    }
}

/// Records a status report, printing progress to the terminal when
/// `print_progress` is set.
pub fn record_task_status(
    store: &mut Store,
    status: TaskStatus,
    job_name: &str,
    task_id: &str,
    version: i64,
    task_info: Value,
    print_progress: bool,
) -> Result<TaskRecord, RecorderError> {
    let key = TaskKey::new(job_name, task_id, version);
    let mut recorder = Recorder::new(store);
    if print_progress {
        recorder = recorder.with_progress(TaskProgress::new());
    }
    recorder.record(status, &key, task_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn key(task_id: &str, version: i64) -> TaskKey {
        TaskKey::new("ingest", task_id, version)
    }

    /// A clock that advances one second per reading.
    fn ticking_clock() -> impl Fn() -> DateTime<Utc> + 'static {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let ticks = Cell::new(0);
        move || {
            let t = base + Duration::seconds(ticks.get());
            ticks.set(ticks.get() + 1);
            t
        }
    }

    fn stored(store: &Store, key: &TaskKey) -> Option<TaskRecord> {
        store.read_session().unwrap().find_task(key).unwrap()
    }

    #[test]
    fn start_creates_job_and_task() {
        let mut store = Store::open_in_memory().unwrap();
        let task = Recorder::new(&mut store)
            .record(TaskStatus::Start, &key("t1", 0), json!({"n": 5}))
            .unwrap();

        assert_eq!(task.params, json!({"n": 5}));
        assert!(!task.completed);
        let session = store.read_session().unwrap();
        assert_eq!(session.job_names().unwrap(), vec!["ingest"]);
        assert_eq!(session.tasks_for("ingest", 0, false).unwrap(), vec![task]);
    }

    #[test]
    fn start_reuses_existing_job() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store);
        recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();
        recorder
            .record(TaskStatus::Start, &key("t2", 0), json!({}))
            .unwrap();

        let session = store.read_session().unwrap();
        assert_eq!(session.job_names().unwrap(), vec!["ingest"]);
        assert_eq!(session.tasks_for("ingest", 0, false).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_start_is_rejected_and_row_unchanged() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store).with_clock(ticking_clock());
        let first = recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({"n": 5}))
            .unwrap();
        let err = recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({"n": 6}))
            .unwrap_err();

        assert!(matches!(err, RecorderError::DuplicateTask(k) if k == key("t1", 0)));
        assert_eq!(stored(&store, &key("t1", 0)), Some(first));
    }

    #[test]
    fn same_task_id_under_new_version_starts() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store);
        recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();
        recorder
            .record(TaskStatus::Start, &key("t1", 1), json!({}))
            .unwrap();

        let session = store.read_session().unwrap();
        assert_eq!(session.job_versions("ingest").unwrap(), vec![0, 1]);
    }

    #[test]
    fn update_and_finish_require_started_task() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store);

        let err = recorder
            .record(TaskStatus::Update, &key("ghost", 0), json!({}))
            .unwrap_err();
        assert!(matches!(err, RecorderError::TaskNotFound(_)));

        let err = recorder
            .record(TaskStatus::Finish, &key("ghost", 0), json!({}))
            .unwrap_err();
        assert!(matches!(err, RecorderError::TaskNotFound(_)));

        assert!(store.read_session().unwrap().job_names().unwrap().is_empty());
    }

    #[test]
    fn updates_append_without_touching_earlier_entries() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store).with_clock(ticking_clock());
        recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();

        let mut previous = Vec::new();
        for pct in [10, 50, 90] {
            let task = recorder
                .record(TaskStatus::Update, &key("t1", 0), json!({"pct": pct}))
                .unwrap();
            assert_eq!(task.updates.len(), previous.len() + 1);
            let entries: Vec<_> = task.updates.clone().into_iter().collect();
            assert_eq!(&entries[..previous.len()], &previous[..]);
            previous = entries;
        }
    }

    #[test]
    fn updates_at_the_same_instant_are_all_kept() {
        let mut store = Store::open_in_memory().unwrap();
        let frozen = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut recorder = Recorder::new(&mut store).with_clock(move || frozen);
        recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();
        recorder
            .record(TaskStatus::Update, &key("t1", 0), json!(1))
            .unwrap();
        let task = recorder
            .record(TaskStatus::Update, &key("t1", 0), json!(2))
            .unwrap();

        assert_eq!(task.updates.len(), 2);
    }

    #[test]
    fn ingest_scenario() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store).with_clock(ticking_clock());
        let t1 = key("t1", 0);

        recorder
            .record(TaskStatus::Start, &t1, json!({"n": 5}))
            .unwrap();
        let task = recorder
            .record(TaskStatus::Update, &t1, json!({"pct": 50}))
            .unwrap();
        assert_eq!(task.updates.len(), 1);

        let task = recorder
            .record(TaskStatus::Finish, &t1, json!({"rows": 5}))
            .unwrap();
        assert!(task.completed);
        assert!(task.end_time.is_some());
        assert_eq!(task.end_info, Some(json!({"rows": 5})));

        let err = recorder
            .record(TaskStatus::Update, &t1, json!({"pct": 99}))
            .unwrap_err();
        assert!(matches!(err, RecorderError::TaskAlreadyFinished(_)));

        let after = stored(&store, &t1).unwrap();
        assert_eq!(after, task);
        assert_eq!(after.updates.len(), 1);
    }

    #[test]
    fn finish_twice_overwrites_end_fields() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store).with_clock(ticking_clock());
        recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();
        let first = recorder
            .record(TaskStatus::Finish, &key("t1", 0), json!({"rows": 1}))
            .unwrap();
        let second = recorder
            .record(TaskStatus::Finish, &key("t1", 0), json!({"rows": 2}))
            .unwrap();

        assert!(second.completed);
        assert!(second.end_time > first.end_time);
        assert_eq!(
            stored(&store, &key("t1", 0)).unwrap().end_info,
            Some(json!({"rows": 2}))
        );
    }

    #[test]
    fn returned_record_matches_stored_row_with_wall_clock() {
        let mut store = Store::open_in_memory().unwrap();
        let mut recorder = Recorder::new(&mut store);
        let t1 = key("t1", 0);

        let started = recorder
            .record(TaskStatus::Start, &t1, json!({"n": 5}))
            .unwrap();
        assert_eq!(stored(&*recorder.store, &t1), Some(started));

        let updated = recorder
            .record(TaskStatus::Update, &t1, json!({"pct": 50}))
            .unwrap();
        assert_eq!(stored(&*recorder.store, &t1), Some(updated));

        let finished = recorder
            .record(TaskStatus::Finish, &t1, json!({"rows": 5}))
            .unwrap();
        assert_eq!(
            finished.end_time.map(|t| t.timestamp_subsec_nanos() % 1000),
            Some(0)
        );
        assert_eq!(stored(&*recorder.store, &t1), Some(finished));
    }

    #[test]
    fn clock_readings_are_truncated_to_microseconds() {
        let mut store = Store::open_in_memory().unwrap();
        let precise = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + Duration::nanoseconds(422_237_931);
        let task = Recorder::new(&mut store)
            .with_clock(move || precise)
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();

        assert_eq!(task.start_time.timestamp_subsec_nanos(), 422_237_000);
        assert_eq!(stored(&store, &key("t1", 0)), Some(task));
    }

    #[test]
    fn blank_identifiers_are_malformed_input() {
        let mut store = Store::open_in_memory().unwrap();
        let err = Recorder::new(&mut store)
            .record(TaskStatus::Start, &TaskKey::new("", "t1", 0), json!({}))
            .unwrap_err();
        assert!(matches!(err, RecorderError::MalformedInput(_)));
    }

    #[test]
    fn two_handles_on_one_file_start_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cjr.db");
        let mut first = Store::open(&path, &StoreOptions::default()).unwrap();
        let mut second = Store::open(&path, &StoreOptions::default()).unwrap();

        let a = Recorder::new(&mut first).record(TaskStatus::Start, &key("t1", 0), json!({}));
        let b = Recorder::new(&mut second).record(TaskStatus::Start, &key("t1", 0), json!({}));

        assert!(a.is_ok());
        assert!(matches!(b, Err(RecorderError::DuplicateTask(_))));
    }

    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<String>>>);

    impl ProgressSink for Captured {
        fn begin(&mut self, status: TaskStatus, key: &TaskKey) {
            self.0.borrow_mut().push(format!("begin {status} {key}"));
        }
        fn succeeded(&mut self, status: TaskStatus, task: &TaskRecord) {
            self.0.borrow_mut().push(format!("ok {status} {}", task.key));
        }
        fn failed(&mut self, status: TaskStatus, key: &TaskKey, _err: &RecorderError) {
            self.0.borrow_mut().push(format!("failed {status} {key}"));
        }
    }

    #[test]
    fn progress_sink_sees_each_outcome() {
        let mut store = Store::open_in_memory().unwrap();
        let captured = Captured::default();
        let mut recorder = Recorder::new(&mut store).with_progress(captured.clone());

        recorder
            .record(TaskStatus::Start, &key("t1", 0), json!({}))
            .unwrap();
        recorder
            .record(TaskStatus::Update, &key("t2", 0), json!({}))
            .unwrap_err();

        assert_eq!(
            *captured.0.borrow(),
            vec![
                "begin START ingest - t1 v0",
                "ok START ingest - t1 v0",
                "begin UPDATE ingest - t2 v0",
                "failed UPDATE ingest - t2 v0",
            ]
        );
    }

    #[test]
    fn record_task_status_entry_point() {
        let mut store = Store::open_in_memory().unwrap();
        record_task_status(&mut store, TaskStatus::Start, "ingest", "t1", 0, json!({}), false)
            .unwrap();
        let err = record_task_status(
            &mut store,
            TaskStatus::Start,
            "ingest",
            "t1",
            0,
            json!({}),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, RecorderError::DuplicateTask(_)));
    }
}
