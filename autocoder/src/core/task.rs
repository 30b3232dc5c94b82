//! Task records and their line-oriented text format.
//!
//! ```text
//! task start:
//! task number: 1
//! description: greet a user by name
//! important notes: empty name means "World"
//! expected result: Hello, Bob!
//! test data: "Bob" -> "Hello, Bob!"
//! function signature: func Greeting(name string) string
//! status: new
//! task end.
//! ```
//!
//! Parsing and status rewriting are pure; `io::task_store` owns the file.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const RECORD_START: &str = "task start:";
pub const RECORD_END: &str = "task end.";

pub const KEY_NUM: &str = "task number";
pub const KEY_DESCRIPTION: &str = "description";
pub const KEY_IMPORTANT: &str = "important notes";
pub const KEY_EXPECTED: &str = "expected result";
pub const KEY_TESTS: &str = "test data";
pub const KEY_SIGNATURE: &str = "function signature";
pub const KEY_STATUS: &str = "status";

/// Lifecycle status of a task: `new -> run -> {ok | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    New,
    Run,
    Error,
    Ok,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Run => "run",
            TaskStatus::Error => "error",
            TaskStatus::Ok => "ok",
        }
    }

    /// Whether the orchestrator may move a task from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::New, TaskStatus::Run)
                | (TaskStatus::Run, TaskStatus::Ok)
                | (TaskStatus::Run, TaskStatus::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(TaskStatus::New),
            "run" => Ok(TaskStatus::Run),
            "error" => Ok(TaskStatus::Error),
            "ok" => Ok(TaskStatus::Ok),
            other => Err(Error::StoreCorruption(format!(
                "unknown status value '{other}'"
            ))),
        }
    }
}

/// One unit of work read from the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub num: u32,
    pub description: String,
    pub important_info: String,
    pub expect_result: String,
    pub tests_value: String,
    /// May be empty.
    pub func_signature: String,
    pub status: TaskStatus,
}

/// Parse every record in `text`, in file order.
///
/// Lines outside records and unknown keys inside records are ignored.
pub fn parse_tasks(text: &str) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    let mut seen = HashSet::new();
    let mut current: Option<RecordFields> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with(RECORD_START) {
            if current.is_some() {
                return Err(Error::StoreCorruption(format!(
                    "line {line_no}: task record starts before the previous one ended"
                )));
            }
            current = Some(RecordFields::new(line_no));
            continue;
        }
        if line.starts_with(RECORD_END) {
            let Some(fields) = current.take() else {
                continue;
            };
            let task = fields.into_task()?;
            if !seen.insert(task.num) {
                return Err(Error::StoreCorruption(format!(
                    "line {line_no}: duplicate task number {}",
                    task.num
                )));
            }
            tasks.push(task);
            continue;
        }
        if let (Some(fields), Some((key, value))) = (current.as_mut(), line.split_once(':')) {
            fields.set(key.trim(), value.trim());
        }
    }

    if let Some(fields) = current {
        return Err(Error::StoreCorruption(format!(
            "task record starting at line {} is never closed with '{RECORD_END}'",
            fields.start_line
        )));
    }
    Ok(tasks)
}

/// First task with status `new`, in store order.
pub fn first_new(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().find(|task| task.status == TaskStatus::New)
}

/// Result of rewriting one task's status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRewrite {
    pub text: String,
    pub previous: TaskStatus,
}

/// Rewrite the status line of task `num`, leaving every other byte untouched.
pub fn rewrite_status(text: &str, num: u32, status: TaskStatus) -> Result<StatusRewrite> {
    let segments: Vec<&str> = text.split_inclusive('\n').collect();
    let mut in_record = false;
    let mut record_num: Option<u32> = None;
    let mut status_idx: Option<usize> = None;
    let mut target: Option<usize> = None;

    for (idx, segment) in segments.iter().enumerate() {
        let line = segment.trim();
        if line.starts_with(RECORD_START) {
            in_record = true;
            record_num = None;
            status_idx = None;
            continue;
        }
        if !in_record {
            continue;
        }
        if line.starts_with(RECORD_END) {
            if record_num == Some(num) {
                let idx = status_idx.ok_or_else(|| {
                    Error::StoreCorruption(format!("task {num} has no '{KEY_STATUS}' line"))
                })?;
                target = Some(idx);
                break;
            }
            in_record = false;
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            match key.trim() {
                KEY_NUM => record_num = value.trim().parse().ok(),
                KEY_STATUS => status_idx = Some(idx),
                _ => {}
            }
        }
    }

    let idx = target.ok_or_else(|| Error::StoreCorruption(format!("task {num} not found")))?;
    let (replaced, previous) = replace_status_line(segments[idx], status)?;

    let mut out = String::with_capacity(text.len() + 8);
    for (i, segment) in segments.iter().enumerate() {
        if i == idx {
            out.push_str(&replaced);
        } else {
            out.push_str(segment);
        }
    }
    Ok(StatusRewrite {
        text: out,
        previous,
    })
}

/// Render a task as a store record (used by `init` and tests).
pub fn render_record(task: &Task) -> String {
    let mut buf = String::new();
    buf.push_str(RECORD_START);
    buf.push('\n');
    for (key, value) in [
        (KEY_NUM, task.num.to_string()),
        (KEY_DESCRIPTION, task.description.clone()),
        (KEY_IMPORTANT, task.important_info.clone()),
        (KEY_EXPECTED, task.expect_result.clone()),
        (KEY_TESTS, task.tests_value.clone()),
        (KEY_SIGNATURE, task.func_signature.clone()),
        (KEY_STATUS, task.status.to_string()),
    ] {
        buf.push_str(&format!("{key}: {value}\n"));
    }
    buf.push_str(RECORD_END);
    buf.push('\n');
    buf
}

fn replace_status_line(segment: &str, status: TaskStatus) -> Result<(String, TaskStatus)> {
    let (body, ending) = split_line_ending(segment);
    let (key_part, value) = body
        .split_once(':')
        .ok_or_else(|| Error::StoreCorruption("status line lost its ':'".to_string()))?;
    let previous = value.trim().parse::<TaskStatus>()?;
    Ok((format!("{key_part}: {status}{ending}"), previous))
}

fn split_line_ending(segment: &str) -> (&str, &str) {
    if let Some(body) = segment.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = segment.strip_suffix('\n') {
        (body, "\n")
    } else {
        (segment, "")
    }
}

struct RecordFields {
    start_line: usize,
    num: Option<String>,
    description: String,
    important_info: String,
    expect_result: String,
    tests_value: String,
    func_signature: String,
    status: Option<String>,
}

impl RecordFields {
    fn new(start_line: usize) -> Self {
        Self {
            start_line,
            num: None,
            description: String::new(),
            important_info: String::new(),
            expect_result: String::new(),
            tests_value: String::new(),
            func_signature: String::new(),
            status: None,
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        let value = value.to_string();
        match key {
            KEY_NUM => self.num = Some(value),
            KEY_DESCRIPTION => self.description = value,
            KEY_IMPORTANT => self.important_info = value,
            KEY_EXPECTED => self.expect_result = value,
            KEY_TESTS => self.tests_value = value,
            KEY_SIGNATURE => self.func_signature = value,
            KEY_STATUS => self.status = Some(value),
            _ => {}
        }
    }

    fn into_task(self) -> Result<Task> {
        let start = self.start_line;
        let raw_num = self.num.ok_or_else(|| {
            Error::StoreCorruption(format!("record at line {start} has no '{KEY_NUM}'"))
        })?;
        let num: u32 = raw_num.parse().map_err(|_| {
            Error::StoreCorruption(format!(
                "record at line {start}: task number '{raw_num}' is not a positive integer"
            ))
        })?;
        if num == 0 {
            return Err(Error::StoreCorruption(format!(
                "record at line {start}: task number must be positive"
            )));
        }
        let status = self
            .status
            .ok_or_else(|| {
                Error::StoreCorruption(format!("task {num} has no '{KEY_STATUS}' line"))
            })?
            .parse()?;
        Ok(Task {
            num,
            description: self.description,
            important_info: self.important_info,
            expect_result: self.expect_result,
            tests_value: self.tests_value,
            func_signature: self.func_signature,
            status,
        })
    }
}
