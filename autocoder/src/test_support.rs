//! Test-only helpers: task builders, scripted boundaries and a temp project.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::task::{Task, TaskStatus, render_record};
use crate::error::{Error, Result};
use crate::io::compiler::{CompileOutput, Compiler};
use crate::io::config::AppConfig;
use crate::io::model::ModelClient;
use crate::io::task_store::TaskStore;

/// Deterministic task with every field filled in.
pub fn sample_task(num: u32, status: TaskStatus) -> Task {
    Task {
        num,
        description: format!("Implement feature {num}"),
        important_info: "Keep it simple".to_string(),
        expect_result: format!("Feature {num} works"),
        tests_value: format!("input {num} -> output {num}"),
        func_signature: format!("func Feature{num}(input int) int"),
        status,
    }
}

/// Render tasks as a store file, one record after another.
pub fn tasks_file(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(render_record)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single `create` command block.
pub fn create_block(path: &str, content: &str) -> String {
    format!("Begin command:\ntype: create\npath: {path}\ncontent: {content}\nEnd command.\n")
}

/// Model client replaying scripted replies in order.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<Result<String>>>,
    requests: RefCell<Vec<String>>,
    reachable: bool,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
            reachable: true,
        }
    }

    /// Successful replies only.
    pub fn replies(replies: Vec<&str>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Make `ping` fail.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// User prompts received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, _system: &str, user: &str) -> Result<String> {
        self.requests.borrow_mut().push(user.to_string());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(Error::TransportFailure("no scripted reply left".to_string())))
    }

    fn ping(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(Error::TransportFailure("connection refused".to_string()))
        }
    }
}

/// Compiler replaying scripted outcomes in order.
pub struct ScriptedCompiler {
    outcomes: RefCell<VecDeque<CompileOutput>>,
    calls: Cell<usize>,
}

impl ScriptedCompiler {
    pub fn new(outcomes: Vec<CompileOutput>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            calls: Cell::new(0),
        }
    }

    pub fn ok() -> CompileOutput {
        CompileOutput {
            log: String::new(),
            ok: true,
        }
    }

    pub fn fail(log: &str) -> CompileOutput {
        CompileOutput {
            log: log.to_string(),
            ok: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Compiler for ScriptedCompiler {
    fn compile(&self, _path: &Path) -> Result<CompileOutput> {
        self.calls.set(self.calls.get() + 1);
        self.outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| Error::TransportFailure("no scripted compile left".to_string()))
    }
}

/// Temp directory holding a task store and an empty working directory.
pub struct TestProject {
    _temp: TempDir,
    root: PathBuf,
    config: AppConfig,
}

impl TestProject {
    pub fn new(tasks: &[Task]) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        let tasks_path = root.join("tasks.txt");
        fs::write(&tasks_path, tasks_file(tasks)).expect("write tasks");
        let workdir = root.join("project");
        fs::create_dir_all(&workdir).expect("create workdir");
        let config = AppConfig {
            tasks_file: tasks_path,
            working_dir: workdir,
            ..AppConfig::default()
        };
        Self {
            _temp: temp,
            root,
            config,
        }
    }

    pub fn with_budgets(mut self, compile_fix: u32, test: u32) -> Self {
        self.config.max_compile_fix_attempts = compile_fix;
        self.config.max_test_attempts = test;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: u32) -> Self {
        self.config.max_task_attempts = max_tasks;
        self
    }

    pub fn with_exchange_log(mut self) -> Self {
        self.config.exchange_log_dir = Some(self.root.join("exchanges"));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(&self.config.tasks_file)
    }

    pub fn tasks_text(&self) -> String {
        fs::read_to_string(&self.config.tasks_file).expect("read tasks")
    }

    pub fn status_of(&self, num: u32) -> TaskStatus {
        self.store()
            .load()
            .expect("load tasks")
            .into_iter()
            .find(|task| task.num == num)
            .map(|task| task.status)
            .expect("task present")
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.config.working_dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    pub fn read_file(&self, rel: &str) -> String {
        fs::read_to_string(self.config.working_dir.join(rel)).expect("read file")
    }

    pub fn workdir_is_empty(&self) -> bool {
        fs::read_dir(&self.config.working_dir)
            .expect("read workdir")
            .next()
            .is_none()
    }
}
