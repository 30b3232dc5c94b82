//! Compiler boundary.
//!
//! The [`Compiler`] trait decouples the orchestrator from the toolchain that
//! validates the project. Tests use scripted compilers that return
//! predetermined outcomes without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::io::config::{CompilerConfig, PATH_PLACEHOLDER};
use crate::io::process::run_command_with_timeout;

/// Result of one compile attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// Combined stdout/stderr, fed back to the model on failure.
    pub log: String,
    pub ok: bool,
}

/// Abstraction over project validation backends.
pub trait Compiler {
    /// Compile the directory or file at `path`.
    ///
    /// A failing compile is `Ok` with `ok == false`; `Err` is reserved for a
    /// compiler that could not run at all.
    fn compile(&self, path: &Path) -> Result<CompileOutput>;
}

/// Compiler that spawns the configured toolchain command.
pub struct ProcessCompiler {
    config: CompilerConfig,
}

impl ProcessCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, path: &Path) -> Result<Command> {
        if path.is_dir() {
            let (program, args) = self
                .config
                .project_command
                .split_first()
                .ok_or_else(|| Error::TransportFailure("compiler.project_command is empty".into()))?;
            let mut cmd = Command::new(program);
            cmd.args(args).current_dir(path);
            return Ok(cmd);
        }
        let file = path.to_string_lossy();
        let argv: Vec<String> = self
            .config
            .file_command
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, &file))
            .collect();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::TransportFailure("compiler.file_command is empty".into()))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(parent) = parent_dir(path) {
            cmd.current_dir(parent);
        }
        Ok(cmd)
    }
}

fn parent_dir(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

impl Compiler for ProcessCompiler {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn compile(&self, path: &Path) -> Result<CompileOutput> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_command_with_timeout(
            self.build_command(path)?,
            timeout,
            self.config.output_limit_bytes,
        )?;
        let ok = output.success();
        let log = output.combined_log("compiler", timeout);
        if ok {
            info!("compile succeeded");
        } else {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "compile failed");
        }
        Ok(CompileOutput { log, ok })
    }
}
