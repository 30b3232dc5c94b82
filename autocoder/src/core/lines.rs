//! Pure line transforms behind `edit`, `add-lines` and `delete-lines`.
//!
//! Every function validates all keys before touching the line buffer, so a
//! failed call leaves the caller's lines unchanged.

use std::path::Path;

use crate::core::command::LineMap;
use crate::error::{Error, Result};

/// Split file text on `\n`, dropping the empty element after a trailing newline.
pub fn split_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

/// Join lines with `\n` and a single trailing newline (empty input stays empty).
pub fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut buf = lines.join("\n");
    buf.push('\n');
    buf
}

/// Overwrite lines in place. Every key must be within `[1, len]`.
pub fn apply_edit(path: &Path, lines: &mut [String], edits: &LineMap) -> Result<()> {
    if edits.is_empty() {
        return Err(Error::InvalidCommand(format!(
            "edit {}: no lines given",
            path.display()
        )));
    }
    for &line in edits.keys() {
        check_bounds(path, line, lines.len())?;
    }
    for (&line, text) in edits {
        lines[index(line)] = text.clone();
    }
    Ok(())
}

/// Append lines. Sorted keys must be exactly `len+1, len+2, ...`.
pub fn apply_append(path: &Path, lines: &mut Vec<String>, additions: &LineMap) -> Result<()> {
    let Some((&first, _)) = additions.first_key_value() else {
        return Err(Error::InvalidCommand(format!(
            "add-lines {}: no lines given",
            path.display()
        )));
    };
    let expected = lines.len() as i64 + 1;
    if first != expected {
        return Err(Error::InvalidCommand(format!(
            "add-lines {}: first new line must be {expected}, got {first} (file has {} lines)",
            path.display(),
            lines.len()
        )));
    }
    // BTreeMap keys are unique and ascending, so contiguity means the last key
    // sits exactly `count - 1` past the first.
    let count = additions.len() as i64;
    let last = additions.keys().next_back().copied().unwrap_or(first);
    if last != first + count - 1 {
        return Err(Error::InvalidCommand(format!(
            "add-lines {}: line numbers must be consecutive from {expected}",
            path.display()
        )));
    }
    lines.extend(additions.values().cloned());
    Ok(())
}

/// Remove lines, highest key first so earlier removals never shift pending keys.
pub fn apply_delete(path: &Path, lines: &mut Vec<String>, removals: &LineMap) -> Result<()> {
    if removals.is_empty() {
        return Err(Error::InvalidCommand(format!(
            "delete-lines {}: no lines given",
            path.display()
        )));
    }
    let mut scratch = lines.clone();
    for &line in removals.keys().rev() {
        check_bounds(path, line, scratch.len())?;
        scratch.remove(index(line));
    }
    *lines = scratch;
    Ok(())
}

fn check_bounds(path: &Path, line: i64, len: usize) -> Result<()> {
    if line < 1 || line > len as i64 {
        return Err(Error::OutOfRange {
            path: path.to_path_buf(),
            line,
            len,
        });
    }
    Ok(())
}

fn index(line: i64) -> usize {
    (line - 1) as usize
}
