//! Typed error taxonomy shared by the parser, executor, task store and boundaries.
//!
//! Components below the orchestrator return [`Result`]. The orchestrator and CLI
//! wrap these in `anyhow` with context; callers recover the typed cause with
//! `err.downcast_ref::<Error>()`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::task::TaskStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Target path is required to exist but is absent.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Target path must be absent but exists.
    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Missing or empty required field, or a malformed line map.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Line index outside `[1, len]`.
    #[error("line {line} out of range for {} ({len} lines)", .path.display())]
    OutOfRange {
        path: PathBuf,
        line: i64,
        len: usize,
    },

    /// Command type the executor does not apply.
    #[error("unknown command type '{0}'")]
    UnknownCommand(String),

    /// Response matches neither accepted grammar, or holds no commands.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Model or compiler boundary unreachable or answering with a failure.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Task record malformed, or the record/status line to update is missing.
    #[error("task store corrupted: {0}")]
    StoreCorruption(String),

    /// No task with status `new` remains in the store.
    #[error("no task with status new")]
    NoPendingTask,

    #[error("task {num}: status transition {from} -> {to} is not allowed")]
    InvalidTransition {
        num: u32,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("project still fails to compile after {attempts} attempts")]
    CompileBudgetExhausted { attempts: u32 },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_names_path_and_bounds() {
        let err = Error::OutOfRange {
            path: PathBuf::from("src/main.go"),
            line: 99,
            len: 10,
        };
        assert_eq!(
            err.to_string(),
            "line 99 out of range for src/main.go (10 lines)"
        );
    }

    #[test]
    fn io_error_keeps_source() {
        let err = Error::io(
            "read tasks.txt",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "denied");
    }
}
