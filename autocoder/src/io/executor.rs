//! Command executor: applies one parsed [`Command`] to the filesystem.
//!
//! Preconditions are re-checked against the live filesystem at apply time,
//! in a fixed order, stopping at the first failure. Line operations are
//! computed in memory and written once, so a rejected command never leaves a
//! half-edited file. There is no transaction across commands.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::core::command::{Command, CommandKind, LineMap};
use crate::core::lines::{apply_append, apply_delete, apply_edit, join_lines, split_lines};
use crate::error::{Error, Result};

/// Apply `cmd` relative to `root`. Only `read` yields content.
///
/// Relative paths are joined onto `root`; absolute paths are used as given.
#[instrument(skip_all, fields(kind = %cmd.kind()))]
pub fn execute_command(root: &Path, cmd: &Command) -> Result<Option<String>> {
    debug!(command = %cmd, "applying command");
    match cmd.kind() {
        CommandKind::Create => create(&resolve(root, cmd.path())?, cmd.content()).map(|()| None),
        CommandKind::Delete => delete(&resolve(root, cmd.path())?).map(|()| None),
        CommandKind::Edit => rewrite_lines(&resolve(root, cmd.path())?, cmd.lines(), |p, l, m| {
            apply_edit(p, l, m)
        })
        .map(|()| None),
        CommandKind::AddLines => {
            rewrite_lines(&resolve(root, cmd.path())?, cmd.lines(), apply_append).map(|()| None)
        }
        CommandKind::DeleteLines => {
            rewrite_lines(&resolve(root, cmd.path())?, cmd.lines(), apply_delete).map(|()| None)
        }
        CommandKind::Copy => {
            let (src, dst) = transfer_paths(root, cmd)?;
            copy(&src, &dst).map(|()| None)
        }
        CommandKind::Move => {
            let (src, dst) = transfer_paths(root, cmd)?;
            relocate(&src, &dst).map(|()| None)
        }
        CommandKind::Read => read_lossy(&resolve(root, cmd.path())?).map(Some),
        CommandKind::Compile | CommandKind::Unknown(_) => {
            Err(Error::UnknownCommand(cmd.kind().label().to_string()))
        }
    }
}

fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidCommand("empty path".to_string()));
    }
    Ok(root.join(trimmed))
}

fn transfer_paths(root: &Path, cmd: &Command) -> Result<(PathBuf, PathBuf)> {
    if cmd.src_path().trim().is_empty() || cmd.dst_path().trim().is_empty() {
        return Err(Error::InvalidCommand(format!(
            "{} requires both source and destination paths",
            cmd.kind()
        )));
    }
    Ok((resolve(root, cmd.src_path())?, resolve(root, cmd.dst_path())?))
}

fn require_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    Ok(())
}

fn require_absent(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::AlreadyExists(path.to_path_buf()));
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("create directory {}", parent.display()), e))?;
    }
    Ok(())
}

fn create(path: &Path, content: &str) -> Result<()> {
    require_absent(path)?;
    if content.is_empty() {
        return Err(Error::InvalidCommand(format!(
            "create {}: content is empty",
            path.display()
        )));
    }
    ensure_parent(path)?;
    fs::write(path, content).map_err(|e| Error::io(format!("write {}", path.display()), e))
}

fn delete(path: &Path) -> Result<()> {
    require_exists(path)?;
    fs::remove_file(path).map_err(|e| Error::io(format!("delete {}", path.display()), e))
}

fn read(path: &Path) -> Result<String> {
    require_exists(path)?;
    fs::read_to_string(path).map_err(|e| Error::io(format!("read {}", path.display()), e))
}

/// Content for a `read` command. Invalid UTF-8 is replaced, not rejected.
fn read_lossy(path: &Path) -> Result<String> {
    require_exists(path)?;
    let bytes = fs::read(path).map_err(|e| Error::io(format!("read {}", path.display()), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn rewrite_lines<F>(path: &Path, map: &LineMap, transform: F) -> Result<()>
where
    F: FnOnce(&Path, &mut Vec<String>, &LineMap) -> Result<()>,
{
    let original = read(path)?;
    let mut lines = split_lines(&original);
    transform(path, &mut lines, map)?;
    fs::write(path, join_lines(&lines))
        .map_err(|e| Error::io(format!("write {}", path.display()), e))
}

fn copy(src: &Path, dst: &Path) -> Result<()> {
    require_exists(src)?;
    require_absent(dst)?;
    ensure_parent(dst)?;
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| Error::io(format!("copy {} to {}", src.display(), dst.display()), e))
}

fn relocate(src: &Path, dst: &Path) -> Result<()> {
    require_exists(src)?;
    require_absent(dst)?;
    ensure_parent(dst)?;
    if let Err(err) = fs::rename(src, dst) {
        warn!(err = %err, "rename failed, falling back to copy and delete");
        fs::copy(src, dst).map_err(|e| {
            Error::io(format!("copy {} to {}", src.display(), dst.display()), e)
        })?;
        fs::remove_file(src).map_err(|e| Error::io(format!("remove {}", src.display()), e))?;
    }
    Ok(())
}
