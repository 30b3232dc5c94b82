//! Durable task store: the line-oriented task file on disk.
//!
//! Every update rewrites a single status line and replaces the file atomically
//! through a sibling temp file, so a crash leaves either the old or the new
//! store, never a torn one.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::core::task::{Task, TaskStatus, first_new, parse_tasks, rewrite_status};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All tasks in file order.
    pub fn load(&self) -> Result<Vec<Task>> {
        parse_tasks(&self.read()?)
    }

    /// First task with status `new`, or [`Error::NoPendingTask`].
    pub fn next_new(&self) -> Result<Task> {
        let tasks = self.load()?;
        first_new(&tasks).cloned().ok_or(Error::NoPendingTask)
    }

    /// Move task `num` along the lifecycle (`new -> run -> ok|error`).
    ///
    /// Returns the previous status. Disallowed moves fail with
    /// [`Error::InvalidTransition`] and leave the file untouched.
    #[instrument(skip_all, fields(num = num, to = %to))]
    pub fn transition(&self, num: u32, to: TaskStatus) -> Result<TaskStatus> {
        let text = self.read()?;
        let rewrite = rewrite_status(&text, num, to)?;
        if !rewrite.previous.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                num,
                from: rewrite.previous,
                to,
            });
        }
        self.write_atomic(&rewrite.text)?;
        info!(from = %rewrite.previous, "task status updated");
        Ok(rewrite.previous)
    }

    /// Overwrite the status of task `num` without lifecycle checks.
    ///
    /// Used by `autocoder reset` to recover tasks stuck in `run` or to retry
    /// failed ones.
    #[instrument(skip_all, fields(num = num, to = %to))]
    pub fn set_status(&self, num: u32, to: TaskStatus) -> Result<TaskStatus> {
        let text = self.read()?;
        let rewrite = rewrite_status(&text, num, to)?;
        self.write_atomic(&rewrite.text)?;
        info!(from = %rewrite.previous, "task status reset");
        Ok(rewrite.previous)
    }

    fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Err(Error::NotFound(self.path.clone()));
        }
        fs::read_to_string(&self.path)
            .map_err(|err| Error::io(format!("read task store {}", self.path.display()), err))
    }

    fn write_atomic(&self, contents: &str) -> Result<()> {
        let tmp_path = sibling_tmp(&self.path);
        fs::write(&tmp_path, contents)
            .map_err(|err| Error::io(format!("write temp store {}", tmp_path.display()), err))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|err| Error::io(format!("replace task store {}", self.path.display()), err))?;
        debug!(path = %self.path.display(), bytes = contents.len(), "task store written");
        Ok(())
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("tasks"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_task, tasks_file};

    fn store_with(text: &str) -> (tempfile::TempDir, TaskStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.txt");
        fs::write(&path, text).expect("write tasks");
        (temp, TaskStore::new(path))
    }

    #[test]
    fn next_new_skips_finished_tasks() {
        let text = tasks_file(&[
            sample_task(1, TaskStatus::Ok),
            sample_task(2, TaskStatus::Error),
            sample_task(3, TaskStatus::New),
            sample_task(4, TaskStatus::New),
        ]);
        let (_temp, store) = store_with(&text);
        let task = store.next_new().expect("pending");
        assert_eq!(task, sample_task(3, TaskStatus::New));
    }

    #[test]
    fn next_new_reports_no_pending_task() {
        let text = tasks_file(&[sample_task(1, TaskStatus::Ok)]);
        let (_temp, store) = store_with(&text);
        assert!(matches!(store.next_new(), Err(Error::NoPendingTask)));
    }

    #[test]
    fn transition_rewrites_only_the_status_line() {
        let text = format!(
            "notes for the operator\r\n\r\n{}",
            tasks_file(&[sample_task(1, TaskStatus::New), sample_task(2, TaskStatus::New)])
        );
        let (_temp, store) = store_with(&text);

        let previous = store.transition(2, TaskStatus::Run).expect("transition");
        assert_eq!(previous, TaskStatus::New);

        let updated = fs::read_to_string(store.path()).expect("read");
        let mut expected = text.clone();
        let second = expected.rfind("status: new").expect("second status");
        expected.replace_range(second..second + "status: new".len(), "status: run");
        assert_eq!(updated, expected);
        assert!(!store.path().with_file_name("tasks.txt.tmp").exists());
    }

    #[test]
    fn transition_rejects_leaving_a_terminal_state() {
        let text = tasks_file(&[sample_task(1, TaskStatus::Ok)]);
        let (_temp, store) = store_with(&text);
        let err = store.transition(1, TaskStatus::Run).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                num: 1,
                from: TaskStatus::Ok,
                to: TaskStatus::Run
            }
        ));
        assert_eq!(fs::read_to_string(store.path()).expect("read"), text);
    }

    #[test]
    fn set_status_bypasses_lifecycle_checks() {
        let text = tasks_file(&[sample_task(1, TaskStatus::Error)]);
        let (_temp, store) = store_with(&text);
        let previous = store.set_status(1, TaskStatus::New).expect("reset");
        assert_eq!(previous, TaskStatus::Error);
        assert_eq!(store.next_new().expect("pending").num, 1);
    }

    #[test]
    fn missing_task_is_store_corruption() {
        let text = tasks_file(&[sample_task(1, TaskStatus::New)]);
        let (_temp, store) = store_with(&text);
        assert!(matches!(
            store.transition(7, TaskStatus::Run),
            Err(Error::StoreCorruption(_))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(temp.path().join("absent.txt"));
        assert!(matches!(store.load(), Err(Error::NotFound(_))));
    }
}
