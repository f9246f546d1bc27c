//! Plan / execute / replan engine for a tool-using model.
//!
//! A run turns a goal into a plan of subtasks, lets a human approve it,
//! works through each subtask with a bounded reason-act-observe loop, and
//! asks a replanner what remains once the queue is exhausted. The crate is
//! split the same way throughout:
//!
//! - **[`core`]**: pure, deterministic logic (run state, error taxonomy,
//!   repetition detection, content references, queue rules). No I/O.
//! - **[`io`]**: side-effecting adapters (filesystem sandbox, config,
//!   snapshots, model command, prompts, terminal review, child processes).
//! - **[`tools`]**: the tool contract and the built-in tools.
//!
//! Orchestration modules ([`dispatch`], [`react`], [`orchestrate`]) combine
//! them into the inner and outer loops; [`status`] and [`validate`] back the
//! CLI commands of the same names.

pub mod cancel;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod react;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod validate;
