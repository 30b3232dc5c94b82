//! Environment checks run before `autocoder run` touches the task store.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::io::config::CompilerConfig;
use crate::io::model::ModelClient;

const PROBE_DIR: &str = ".autocoder-preflight";

/// Check that the model backend answers, the compiler programs can be found
/// and `working_dir` is writable.
///
/// `working_dir` is created if it does not exist yet.
#[instrument(skip_all, fields(working_dir = %working_dir.display()))]
pub fn run_preflight<M: ModelClient>(
    model: &M,
    compiler: &CompilerConfig,
    working_dir: &Path,
) -> Result<()> {
    model.ping().context("model backend is not reachable")?;
    for command in [&compiler.project_command, &compiler.file_command] {
        let program = command
            .first()
            .ok_or_else(|| anyhow!("compiler command is empty"))?;
        let resolved = resolve_program(program)
            .ok_or_else(|| anyhow!("compiler program '{program}' not found"))?;
        debug!(program = %program, path = %resolved.display(), "compiler program found");
    }
    fs::create_dir_all(working_dir)
        .with_context(|| format!("create working dir {}", working_dir.display()))?;
    let probe = working_dir.join(PROBE_DIR);
    fs::create_dir_all(&probe)
        .with_context(|| format!("working dir {} is not writable", working_dir.display()))?;
    fs::write(probe.join("probe"), b"ok")
        .with_context(|| format!("working dir {} is not writable", working_dir.display()))?;
    fs::remove_dir_all(&probe).with_context(|| format!("remove {}", probe.display()))?;
    info!("preflight passed");
    Ok(())
}

/// Locate `program` the way a spawn would: a path is checked directly, a
/// bare name is searched on `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            [
                dir.join(program),
                dir.join(format!("{program}{}", env::consts::EXE_SUFFIX)),
            ]
        })
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    fn compiler(program: &str) -> CompilerConfig {
        CompilerConfig {
            project_command: vec![program.to_string()],
            file_command: vec![program.to_string()],
            ..CompilerConfig::default()
        }
    }

    fn current_exe() -> String {
        env::current_exe()
            .expect("current exe")
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn passes_and_leaves_no_probe_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workdir = temp.path().join("project");
        run_preflight(
            &ScriptedModel::new(Vec::new()),
            &compiler(&current_exe()),
            &workdir,
        )
        .expect("preflight");
        assert!(workdir.is_dir());
        assert!(!workdir.join(PROBE_DIR).exists());
    }

    #[test]
    fn unreachable_model_fails_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new(Vec::new()).unreachable();
        let err = run_preflight(&model, &compiler(&current_exe()), temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("not reachable"));
    }

    #[test]
    fn missing_compiler_fails_before_touching_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workdir = temp.path().join("project");
        let err = run_preflight(
            &ScriptedModel::new(Vec::new()),
            &compiler("autocoder-missing-compiler"),
            &workdir,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("'autocoder-missing-compiler' not found"));
        assert!(!workdir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn bare_program_names_are_searched_on_path() {
        assert!(resolve_program("sh").is_some());
        assert!(resolve_program("autocoder-missing-compiler").is_none());
    }
}
