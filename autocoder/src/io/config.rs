//! Autocoder configuration stored in `autocoder.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::response::WireFormat;

/// Default config file name, resolved against the current directory.
pub const CONFIG_FILE: &str = "autocoder.toml";

/// Placeholder replaced by the file path in [`CompilerConfig::file_command`].
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Autocoder configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Task store file.
    pub tasks_file: PathBuf,

    /// Project root that commands and the compiler operate on.
    pub working_dir: PathBuf,

    /// Maximum number of tasks processed by one `run`.
    pub max_task_attempts: u32,

    /// Compile-fix iterations after the solution is applied.
    pub max_compile_fix_attempts: u32,

    /// Compile iterations after the tests are applied.
    pub max_test_attempts: u32,

    /// When set, every prompt/response/compile log is written under this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_log_dir: Option<PathBuf>,

    pub model: ModelConfig,
    pub compiler: CompilerConfig,
    pub prompt: PromptConfig,
}

/// OpenAI-compatible chat completion backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL; `/chat/completions` and `/models` are appended.
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Run inside the project directory (e.g. `["go","vet","./..."]`).
    pub project_command: Vec<String>,

    /// Run for a single file, `{path}` substituted (e.g. `["go","vet","{path}"]`).
    pub file_command: Vec<String>,

    pub timeout_secs: u64,

    /// Truncate compiler stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Target language named in every prompt.
    pub language: String,

    /// Command grammar the system prompt asks for.
    pub wire_format: WireFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tasks_file: PathBuf::from("tasks.txt"),
            working_dir: PathBuf::from("."),
            max_task_attempts: 10,
            max_compile_fix_attempts: 10,
            max_test_attempts: 10,
            exchange_log_dir: None,
            model: ModelConfig::default(),
            compiler: CompilerConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            timeout_secs: 300,
            temperature: 0.0,
            max_tokens: 16_384,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            project_command: vec!["go".to_string(), "vet".to_string(), "./...".to_string()],
            file_command: vec![
                "go".to_string(),
                "vet".to_string(),
                PATH_PLACEHOLDER.to_string(),
            ],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            language: "Go".to_string(),
            wire_format: WireFormat::Blocks,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tasks_file.as_os_str().is_empty() {
            return Err(anyhow!("tasks_file must not be empty"));
        }
        if self.max_task_attempts == 0 {
            return Err(anyhow!("max_task_attempts must be > 0"));
        }
        if self.max_compile_fix_attempts == 0 {
            return Err(anyhow!("max_compile_fix_attempts must be > 0"));
        }
        if self.max_test_attempts == 0 {
            return Err(anyhow!("max_test_attempts must be > 0"));
        }
        if self.model.endpoint.trim().is_empty() {
            return Err(anyhow!("model.endpoint must not be empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must not be empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if !non_empty_command(&self.compiler.project_command) {
            return Err(anyhow!("compiler.project_command must be a non-empty array"));
        }
        if !non_empty_command(&self.compiler.file_command) {
            return Err(anyhow!("compiler.file_command must be a non-empty array"));
        }
        if self.compiler.timeout_secs == 0 {
            return Err(anyhow!("compiler.timeout_secs must be > 0"));
        }
        if self.compiler.output_limit_bytes == 0 {
            return Err(anyhow!("compiler.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

fn non_empty_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.max_task_attempts, 10);
        assert_eq!(cfg.model.endpoint, "http://localhost:1234/v1");
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let mut cfg = AppConfig::default();
        cfg.exchange_log_dir = Some(PathBuf::from("logs"));
        cfg.prompt.wire_format = WireFormat::Json;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "max_test_attempts = 3\n\n[model]\nmodel = \"qwen2.5-coder\"\n\n[prompt]\nwire_format = \"json\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_test_attempts, 3);
        assert_eq!(cfg.max_compile_fix_attempts, 10);
        assert_eq!(cfg.model.model, "qwen2.5-coder");
        assert_eq!(cfg.model.max_tokens, 16_384);
        assert_eq!(cfg.prompt.wire_format, WireFormat::Json);
        assert_eq!(cfg.prompt.language, "Go");
    }

    #[test]
    fn validate_rejects_zero_budgets_and_empty_commands() {
        let mut cfg = AppConfig::default();
        cfg.max_compile_fix_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.compiler.project_command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.model.endpoint.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_values_fail_to_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "max_task_attempts = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_task_attempts"));
    }
}
