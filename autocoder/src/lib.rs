//! Iterative code generation driven by a language model.
//!
//! The crate reads a queue of task records, asks a model for file-system
//! commands that implement each task, applies them, and runs bounded
//! compile-fix loops until the project compiles. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (command model, reply parsing,
//!   line transforms, task records). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting boundaries (filesystem, child processes, HTTP,
//!   prompt templates). Traits at the model and compiler seams enable
//!   scripted fakes in tests.
//!
//! [`orchestrator`] coordinates core logic with I/O to implement `autocoder run`.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
