//! Task pipeline: solve, compile-fix, tests, test-compile.
//!
//! One `run` pulls pending tasks in store order and drives each through the
//! pipeline under the configured attempt budgets. The first fatal error marks
//! the current task `error` and stops the run.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::command::{Command, CommandKind};
use crate::core::response::parse_response;
use crate::core::task::{Task, TaskStatus};
use crate::error::Error;
use crate::io::compiler::Compiler;
use crate::io::config::AppConfig;
use crate::io::exchange_log::{ExchangeMeta, ExchangeWriteRequest, Stage, write_exchange};
use crate::io::executor::execute_command;
use crate::io::model::ModelClient;
use crate::io::prompt::{PromptBuilder, ReadResult};
use crate::io::task_store::TaskStore;

/// Reason why `Orchestrator::run` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// No task with status `new` remains.
    NoPendingTask,
    /// `max_task_attempts` tasks were processed and more are pending.
    MaxTasksReached { limit: u32 },
}

/// Summary of one successfully processed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub num: u32,
    /// Commands applied across every stage (skipped `compile` commands excluded).
    pub commands_applied: usize,
    /// Fix requests sent before the tests were generated.
    pub compile_fix_rounds: u32,
    /// Whether the project compiled cleanly before the tests were generated.
    pub compiled_before_tests: bool,
    /// Fix requests sent after the tests were applied.
    pub test_fix_rounds: u32,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub tasks: Vec<TaskReport>,
    pub stop: RunStop,
}

/// Per-task bookkeeping shared by the pipeline stages.
struct Session {
    num: u32,
    seq: u32,
    /// `read` results waiting for the next fix prompt.
    reads: Vec<ReadResult>,
    commands_applied: usize,
}

pub struct Orchestrator<M: ModelClient, C: Compiler> {
    config: AppConfig,
    store: TaskStore,
    model: M,
    compiler: C,
    prompts: PromptBuilder,
    system_prompt: String,
}

impl<M: ModelClient, C: Compiler> Orchestrator<M, C> {
    pub fn new(config: AppConfig, model: M, compiler: C) -> Result<Self> {
        let prompts = PromptBuilder::new(&config.prompt)?;
        let system_prompt = prompts.system().context("render system prompt")?;
        Ok(Self {
            store: TaskStore::new(&config.tasks_file),
            config,
            model,
            compiler,
            prompts,
            system_prompt,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Process pending tasks until none remain or `max_task_attempts` is reached.
    ///
    /// `on_task` is called after each task is marked `ok`. Fatal errors carry
    /// `task <N> failed` context; the typed cause stays reachable through
    /// `downcast_ref::<Error>()`.
    pub fn run<F: FnMut(&TaskReport)>(&self, mut on_task: F) -> Result<RunOutcome> {
        let limit = self.config.max_task_attempts;
        let mut tasks = Vec::new();
        for _ in 0..limit {
            let task = match self.store.next_new() {
                Ok(task) => task,
                Err(Error::NoPendingTask) => {
                    info!(processed = tasks.len(), "no pending tasks left");
                    return Ok(RunOutcome {
                        tasks,
                        stop: RunStop::NoPendingTask,
                    });
                }
                Err(err) => return Err(err).context("select next task"),
            };
            let report = self.run_task(&task)?;
            on_task(&report);
            tasks.push(report);
        }

        let stop = match self.store.next_new() {
            Err(Error::NoPendingTask) => RunStop::NoPendingTask,
            _ => RunStop::MaxTasksReached { limit },
        };
        Ok(RunOutcome { tasks, stop })
    }

    /// Mark `task` running, drive it through the pipeline and record the result.
    pub fn run_task(&self, task: &Task) -> Result<TaskReport> {
        let num = task.num;
        self.store
            .transition(num, TaskStatus::Run)
            .with_context(|| format!("task {num}: mark run"))?;

        match self.process_task(task) {
            Ok(report) => {
                self.store
                    .transition(num, TaskStatus::Ok)
                    .with_context(|| format!("task {num}: mark ok"))?;
                info!(num, "task finished");
                Ok(report)
            }
            Err(err) => {
                warn!(num, err = %format!("{err:#}"), "task failed");
                if let Err(mark_err) = self.store.transition(num, TaskStatus::Error) {
                    warn!(num, err = %mark_err, "could not mark task as error");
                }
                Err(err.context(format!("task {num} failed")))
            }
        }
    }

    #[instrument(skip_all, fields(num = task.num))]
    fn process_task(&self, task: &Task) -> Result<TaskReport> {
        let root = self.config.working_dir.as_path();
        let mut session = Session {
            num: task.num,
            seq: 0,
            reads: Vec::new(),
            commands_applied: 0,
        };

        // Solve.
        let prompt = self.prompts.task(task)?;
        let commands = self.exchange(&mut session, Stage::Solve, 1, &prompt, None)?;
        self.apply(root, &commands, &mut session)
            .context("apply solution")?;

        // Compile-fix: every fix is followed by a compile; exhausting the
        // budget is not fatal.
        let mut compile_fix_rounds = 0;
        let mut output = self.compiler.compile(root).context("compile project")?;
        while !output.ok && compile_fix_rounds < self.config.max_compile_fix_attempts {
            compile_fix_rounds += 1;
            self.fix_round(root, &mut session, Stage::CompileFix, compile_fix_rounds, &output.log)?;
            output = self.compiler.compile(root).context("compile project")?;
        }
        let compiled_before_tests = output.ok;
        if !compiled_before_tests {
            warn!(
                attempts = self.config.max_compile_fix_attempts,
                "compile-fix budget exhausted, continuing with tests"
            );
        }

        // Tests.
        let prompt = self.prompts.tests(task)?;
        let commands = self.exchange(&mut session, Stage::Tests, 1, &prompt, None)?;
        self.apply(root, &commands, &mut session)
            .context("apply tests")?;

        // Test-compile: fix errors are swallowed, exhaustion is fatal.
        let mut test_fix_rounds = 0;
        let mut output = self.compiler.compile(root).context("compile tests")?;
        while !output.ok && test_fix_rounds < self.config.max_test_attempts {
            test_fix_rounds += 1;
            if let Err(err) =
                self.fix_round(root, &mut session, Stage::TestFix, test_fix_rounds, &output.log)
            {
                warn!(attempt = test_fix_rounds, err = %format!("{err:#}"), "test fix failed, compiling again");
            }
            output = self.compiler.compile(root).context("compile tests")?;
        }
        if !output.ok {
            return Err(Error::CompileBudgetExhausted {
                attempts: self.config.max_test_attempts,
            }
            .into());
        }
        Ok(TaskReport {
            num: task.num,
            commands_applied: session.commands_applied,
            compile_fix_rounds,
            compiled_before_tests,
            test_fix_rounds,
        })
    }

    /// Send a compile log (plus pending `read` results) and apply the reply.
    fn fix_round(
        &self,
        root: &Path,
        session: &mut Session,
        stage: Stage,
        attempt: u32,
        log: &str,
    ) -> Result<()> {
        let reads = std::mem::take(&mut session.reads);
        let prompt = self
            .prompts
            .compile_fix(&root.display().to_string(), log, &reads)?;
        let commands = self.exchange(session, stage, attempt, &prompt, Some(log))?;
        self.apply(root, &commands, session)
            .with_context(|| format!("apply {} reply {attempt}", stage.as_str()))
    }

    /// One model round trip: request, parse, and optionally log.
    fn exchange(
        &self,
        session: &mut Session,
        stage: Stage,
        attempt: u32,
        prompt: &str,
        compile_log: Option<&str>,
    ) -> Result<Vec<Command>> {
        session.seq += 1;
        let mut meta = ExchangeMeta {
            task: session.num,
            seq: session.seq,
            stage,
            attempt,
            commands: None,
            error: None,
        };

        let reply = match self.model.complete(&self.system_prompt, prompt) {
            Ok(reply) => reply,
            Err(err) => {
                meta.error = Some(err.to_string());
                self.record(&meta, prompt, None, compile_log)?;
                return Err(err).with_context(|| format!("{} request", stage.as_str()));
            }
        };

        let parsed = parse_response(&reply);
        match &parsed {
            Ok(commands) => meta.commands = Some(commands.len()),
            Err(err) => meta.error = Some(err.to_string()),
        }
        self.record(&meta, prompt, Some(&reply), compile_log)?;
        parsed.with_context(|| format!("parse {} reply", stage.as_str()))
    }

    fn record(
        &self,
        meta: &ExchangeMeta,
        prompt: &str,
        response: Option<&str>,
        compile_log: Option<&str>,
    ) -> Result<()> {
        let Some(dir) = self.config.exchange_log_dir.as_deref() else {
            return Ok(());
        };
        let paths = write_exchange(&ExchangeWriteRequest {
            root: dir,
            meta,
            system: &self.system_prompt,
            prompt,
            response,
            compile_log,
        })?;
        debug!(dir = %paths.dir.display(), "exchange logged");
        Ok(())
    }

    /// Execute commands in order, stopping at the first failure.
    ///
    /// `compile` commands are skipped: compiling belongs to the pipeline loops.
    fn apply(&self, root: &Path, commands: &[Command], session: &mut Session) -> Result<()> {
        let mut applied = 0usize;
        for (idx, cmd) in commands.iter().enumerate() {
            if *cmd.kind() == CommandKind::Compile {
                debug!(command = %cmd, "skipping compile command");
                continue;
            }
            let content = execute_command(root, cmd)
                .with_context(|| format!("command {} ({cmd})", idx + 1))?;
            if let Some(content) = content {
                session.reads.push(ReadResult {
                    path: cmd.path().to_string(),
                    content,
                });
            }
            applied += 1;
        }
        session.commands_applied += applied;
        info!(applied, total = commands.len(), "commands applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compiler::CompileOutput;
    use crate::test_support::{
        ScriptedCompiler, ScriptedModel, TestProject, create_block, sample_task,
    };

    fn orchestrator(
        project: &TestProject,
        replies: Vec<&str>,
        compiles: Vec<CompileOutput>,
    ) -> Orchestrator<ScriptedModel, ScriptedCompiler> {
        Orchestrator::new(
            project.config().clone(),
            ScriptedModel::replies(replies),
            ScriptedCompiler::new(compiles),
        )
        .expect("orchestrator")
    }

    #[test]
    fn read_results_feed_the_next_fix_prompt() {
        let project = TestProject::new(&[sample_task(1, TaskStatus::New)]);
        project.write_file("task_1/main.go", "package main\n");
        let solve = "Begin command:\ntype: read\npath: task_1/main.go\nEnd command.";
        let fix = "Begin command:\ntype: edit\npath: task_1/main.go\nlines: {1: \"package greet\"}\nEnd command.";
        let tests = create_block("task_1/main_test.go", "package greet");
        let orch = orchestrator(
            &project,
            vec![solve, fix, tests.as_str()],
            vec![
                ScriptedCompiler::fail("undefined: Greet"),
                ScriptedCompiler::ok(),
                ScriptedCompiler::ok(),
            ],
        );

        let report = orch.run_task(&sample_task(1, TaskStatus::New)).expect("task");
        assert_eq!(report.compile_fix_rounds, 1);
        assert!(report.compiled_before_tests);
        assert_eq!(report.commands_applied, 3);

        let requests = orch.model().requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].contains("undefined: Greet"));
        assert!(requests[1].contains("### task_1/main.go"));
        assert!(!requests[2].contains("### task_1/main.go"));
        assert_eq!(
            project.read_file("task_1/main.go"),
            "package greet\n"
        );
    }

    #[test]
    fn compile_commands_from_the_model_are_skipped() {
        let project = TestProject::new(&[sample_task(1, TaskStatus::New)]);
        let solve = format!(
            "{}\nBegin command:\ntype: compile\npath: task_1/main.go\nEnd command.",
            create_block("task_1/main.go", "package main")
        );
        let tests = create_block("task_1/main_test.go", "package main");
        let orch = orchestrator(
            &project,
            vec![solve.as_str(), tests.as_str()],
            vec![ScriptedCompiler::ok(), ScriptedCompiler::ok()],
        );

        let report = orch.run_task(&sample_task(1, TaskStatus::New)).expect("task");
        assert_eq!(report.commands_applied, 2);
        assert_eq!(orch.compiler().calls(), 2);
    }

    #[test]
    fn compile_fix_exhaustion_continues_to_tests() {
        let task = sample_task(1, TaskStatus::New);
        let project = TestProject::new(std::slice::from_ref(&task)).with_budgets(2, 2);
        let solve = create_block("task_1/main.go", "package main");
        let noop_fix = "Begin command:\ntype: compile\npath: .\nEnd command.";
        let tests = create_block("task_1/greet_test.go", "package main");
        let orch = orchestrator(
            &project,
            vec![solve.as_str(), noop_fix, noop_fix, tests.as_str()],
            vec![
                ScriptedCompiler::fail("e1"),
                ScriptedCompiler::fail("e2"),
                ScriptedCompiler::fail("e3"),
                ScriptedCompiler::ok(),
            ],
        );

        let report = orch.run_task(&task).expect("task");
        assert_eq!(report.compile_fix_rounds, 2);
        assert!(!report.compiled_before_tests);
        assert_eq!(report.test_fix_rounds, 0);
        assert_eq!(orch.compiler().calls(), 4);
        assert_eq!(project.status_of(1), TaskStatus::Ok);
    }

    #[test]
    fn last_fix_in_each_loop_is_compiled_before_giving_up() {
        let project = TestProject::new(&[sample_task(1, TaskStatus::New)]).with_budgets(1, 1);
        let solve = create_block("task_1/main.go", "package main");
        let fix = create_block("task_1/util.go", "package main");
        let tests = create_block("task_1/main_test.go", "package main");
        let test_fix = create_block("task_1/helper_test.go", "package main");
        let orch = orchestrator(
            &project,
            vec![solve.as_str(), fix.as_str(), tests.as_str(), test_fix.as_str()],
            vec![
                ScriptedCompiler::fail("undefined: util"),
                ScriptedCompiler::ok(),
                ScriptedCompiler::fail("undefined: helper"),
                ScriptedCompiler::ok(),
            ],
        );

        let report = orch.run_task(&sample_task(1, TaskStatus::New)).expect("task");
        assert_eq!(report.compile_fix_rounds, 1);
        assert!(report.compiled_before_tests);
        assert_eq!(report.test_fix_rounds, 1);
        assert_eq!(orch.compiler().calls(), 4);
        assert_eq!(project.read_file("task_1/helper_test.go"), "package main");
        assert_eq!(project.status_of(1), TaskStatus::Ok);
    }

    #[test]
    fn test_fix_errors_are_swallowed_until_budget_runs_out() {
        let project = TestProject::new(&[sample_task(1, TaskStatus::New)]).with_budgets(1, 2);
        let solve = create_block("task_1/main.go", "package main");
        let tests = create_block("task_1/main_test.go", "package main");
        let orch = orchestrator(
            &project,
            vec![
                solve.as_str(),
                tests.as_str(),
                "not commands",
                "still not commands",
            ],
            vec![
                ScriptedCompiler::ok(),
                ScriptedCompiler::fail("test e1"),
                ScriptedCompiler::fail("test e2"),
                ScriptedCompiler::fail("test e3"),
            ],
        );

        let err = orch
            .run_task(&sample_task(1, TaskStatus::New))
            .unwrap_err();
        assert_eq!(err.to_string(), "task 1 failed");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CompileBudgetExhausted { attempts: 2 })
        ));
        assert_eq!(project.status_of(1), TaskStatus::Error);
        assert_eq!(orch.model().requests().len(), 4);
        assert_eq!(orch.compiler().calls(), 4);
    }

    #[test]
    fn solve_parse_failure_is_fatal_and_executes_nothing() {
        let project = TestProject::new(&[sample_task(1, TaskStatus::New)]);
        let orch = orchestrator(&project, vec!["Sorry, I cannot help."], Vec::new());

        let err = orch
            .run_task(&sample_task(1, TaskStatus::New))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ParseFailure(_))
        ));
        assert_eq!(orch.compiler().calls(), 0);
        assert_eq!(project.status_of(1), TaskStatus::Error);
        assert!(project.workdir_is_empty());
    }

    #[test]
    fn exchange_log_records_every_round_trip() {
        let project = TestProject::new(&[sample_task(1, TaskStatus::New)]).with_exchange_log();
        let solve = create_block("task_1/main.go", "package main");
        let tests = create_block("task_1/main_test.go", "package main");
        let orch = orchestrator(
            &project,
            vec![solve.as_str(), tests.as_str()],
            vec![ScriptedCompiler::ok(), ScriptedCompiler::ok()],
        );
        orch.run_task(&sample_task(1, TaskStatus::New)).expect("task");

        let log_dir = project
            .config()
            .exchange_log_dir
            .clone()
            .expect("log dir");
        assert!(log_dir.join("task_1/001-solve/response.txt").is_file());
        assert!(log_dir.join("task_1/002-tests/prompt.md").is_file());
    }
}
