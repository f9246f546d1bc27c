//! Deterministic, pure logic shared by the orchestration loops.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod content_store;
pub mod errors;
pub mod invariants;
pub mod repetition;
pub mod run_state;
pub mod task_queue;
pub mod types;
