//! Exchange logging: one directory per model round trip under `exchange_log_dir`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::io::prompt::task_dir;

/// Pipeline stage a model exchange belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Solve,
    CompileFix,
    Tests,
    TestFix,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Solve => "solve",
            Stage::CompileFix => "compile_fix",
            Stage::Tests => "tests",
            Stage::TestFix => "test_fix",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExchangeMeta {
    pub task: u32,
    /// Position of this exchange within the task, starting at 1.
    pub seq: u32,
    pub stage: Stage,
    /// Loop iteration for fix stages, 1 otherwise.
    pub attempt: u32,
    /// Commands parsed from the reply, if it parsed.
    pub commands: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExchangePaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub system_path: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub compile_log_path: PathBuf,
}

impl ExchangePaths {
    pub fn new(root: &Path, task: u32, seq: u32, stage: Stage) -> Self {
        let dir = root
            .join(task_dir(task))
            .join(format!("{seq:03}-{}", stage.as_str()));
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            system_path: dir.join("system.md"),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.txt"),
            compile_log_path: dir.join("compile.log"),
        }
    }
}

pub struct ExchangeWriteRequest<'a> {
    pub root: &'a Path,
    pub meta: &'a ExchangeMeta,
    pub system: &'a str,
    pub prompt: &'a str,
    /// Absent when the model call itself failed.
    pub response: Option<&'a str>,
    /// Compile log that triggered a fix request.
    pub compile_log: Option<&'a str>,
}

pub fn write_exchange(request: &ExchangeWriteRequest<'_>) -> Result<ExchangePaths> {
    let meta = request.meta;
    let paths = ExchangePaths::new(request.root, meta.task, meta.seq, meta.stage);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create exchange dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, meta)?;
    write_text(&paths.system_path, request.system)?;
    write_text(&paths.prompt_path, request.prompt)?;
    if let Some(response) = request.response {
        write_text(&paths.response_path, response)?;
    }
    if let Some(log) = request.compile_log {
        write_text(&paths.compile_log_path, log)?;
    }

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
