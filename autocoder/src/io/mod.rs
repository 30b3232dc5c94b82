//! I/O boundaries: filesystem, child processes, HTTP and prompt templates.

pub mod compiler;
pub mod config;
pub mod exchange_log;
pub mod executor;
pub mod init;
pub mod model;
pub mod preflight;
pub mod process;
pub mod prompt;
pub mod task_store;
