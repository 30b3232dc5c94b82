//! Deterministic, pure logic shared by the autocoder.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and data structures and return deterministic outputs suitable for tests.

pub mod block;
pub mod command;
pub mod lines;
pub mod response;
pub mod task;
