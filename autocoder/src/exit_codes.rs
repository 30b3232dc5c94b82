//! Stable exit codes for autocoder CLI commands.

/// Command succeeded, or `next` found a pending task.
pub const OK: i32 = 0;
/// Command failed: bad config, corrupt task store, or a fatal task error.
pub const FAILED: i32 = 1;
/// `autocoder next` found no task with status `new`.
pub const COMPLETE: i32 = 2;
