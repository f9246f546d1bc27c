//! Stable exit codes for `taskloop` commands.

use crate::core::types::RunStop;

/// Command succeeded or the run completed its goal.
pub const OK: i32 = 0;
/// Invalid layout, config or snapshot, or any other error.
pub const INVALID: i32 = 1;
/// The run stopped on a guard or an unrecoverable model failure.
pub const STOPPED: i32 = 2;
/// The run was cancelled.
pub const CANCELLED: i32 = 3;
/// The run is suspended until the user answers a question (`taskloop resume`).
pub const AWAITING_INPUT: i32 = 4;

pub fn for_stop(stop: RunStop) -> i32 {
    match stop {
        RunStop::Completed => OK,
        RunStop::GuardExceeded | RunStop::ModelFailure => STOPPED,
        RunStop::Cancelled => CANCELLED,
        RunStop::AwaitingInput => AWAITING_INPUT,
    }
}
