//! Scaffolding for `autocoder init`: a default config and a sample task store.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::task::{Task, TaskStatus, render_record};
use crate::io::config::{AppConfig, write_config};

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config and task store.
    pub force: bool,
}

/// Files written by `init_project`.
#[derive(Debug, Clone)]
pub struct InitPaths {
    pub config_path: PathBuf,
    pub tasks_path: PathBuf,
}

/// Write `cfg` to `config_path` and a one-task sample store to `cfg.tasks_file`.
///
/// Fails if either file already exists unless `options.force` is set.
pub fn init_project(config_path: &Path, cfg: &AppConfig, options: &InitOptions) -> Result<InitPaths> {
    let paths = InitPaths {
        config_path: config_path.to_path_buf(),
        tasks_path: cfg.tasks_file.clone(),
    };
    if !options.force {
        for path in [&paths.config_path, &paths.tasks_path] {
            if path.exists() {
                return Err(anyhow!(
                    "autocoder init: {} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
        }
    }

    write_config(&paths.config_path, cfg)?;
    write_file(&paths.tasks_path, &sample_store())?;
    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

fn sample_store() -> String {
    let task = Task {
        num: 1,
        description: "Write a function that greets a person by name.".to_string(),
        important_info: "Use only the standard library.".to_string(),
        expect_result: "Greet(\"Ann\") returns \"Hello, Ann!\"".to_string(),
        tests_value: "\"Ann\" -> \"Hello, Ann!\"; \"\" -> \"Hello, !\"".to_string(),
        func_signature: "func Greet(name string) string".to_string(),
        status: TaskStatus::New,
    };
    format!("{STORE_HEADER}\n{}", render_record(&task))
}

const STORE_HEADER: &str = "Tasks for autocoder. Add records in the same format; \
only the status line is rewritten during a run.\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::parse_tasks;
    use crate::io::config::load_config;

    fn options(force: bool) -> InitOptions {
        InitOptions { force }
    }

    fn config_in(root: &Path) -> AppConfig {
        AppConfig {
            tasks_file: root.join("tasks.txt"),
            ..AppConfig::default()
        }
    }

    #[test]
    fn init_writes_loadable_config_and_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config_in(temp.path());
        let paths = init_project(&temp.path().join("autocoder.toml"), &cfg, &options(false))
            .expect("init");

        assert_eq!(load_config(&paths.config_path).expect("load"), cfg);
        let tasks = parse_tasks(&fs::read_to_string(&paths.tasks_path).expect("read"))
            .expect("parse");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::New);
    }

    #[test]
    fn init_without_force_refuses_existing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config_in(temp.path());
        let config_path = temp.path().join("autocoder.toml");
        init_project(&config_path, &cfg, &options(false)).expect("init");

        let err = init_project(&config_path, &cfg, &options(false)).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_sample_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config_in(temp.path());
        let config_path = temp.path().join("autocoder.toml");
        let paths = init_project(&config_path, &cfg, &options(false)).expect("init");
        fs::write(&paths.tasks_path, "custom").expect("write custom");

        init_project(&config_path, &cfg, &options(true)).expect("re-init");
        assert_eq!(
            fs::read_to_string(&paths.tasks_path).expect("read"),
            sample_store()
        );
    }
}
