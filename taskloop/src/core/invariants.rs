//! Semantic invariants of a persisted run snapshot.

use super::run_state::RunState;
use super::types::{AgentOutcome, RunPhase, RunStop};

/// Check invariants that serde alone cannot express:
/// - `task_cursor <= len(task_queue)`
/// - repetition ring within its capacity
/// - counters within their guards (guards may be exceeded by one turn)
/// - outcome slot and stop reason agree with the phase
/// - content store pointers resolve
pub fn validate_invariants(state: &RunState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.task_cursor > state.task_queue.len() {
        errors.push(format!(
            "task_cursor {} exceeds task_queue length {}",
            state.task_cursor,
            state.task_queue.len()
        ));
    }

    if state.repetition.len() > state.repetition.capacity() {
        errors.push(format!(
            "repetition window holds {} entries but capacity is {}",
            state.repetition.len(),
            state.repetition.capacity()
        ));
    }

    let limits = &state.limits;
    if limits.max_inner_cycles == 0 || limits.max_outer_cycles == 0 {
        errors.push("cycle limits must be > 0".to_string());
    }
    if state.inner_cycles > limits.max_inner_cycles + 1 {
        errors.push(format!(
            "inner_cycles {} exceeds max_inner_cycles {}",
            state.inner_cycles, limits.max_inner_cycles
        ));
    }
    if state.outer_cycles > limits.max_outer_cycles + 1 {
        errors.push(format!(
            "outer_cycles {} exceeds max_outer_cycles {}",
            state.outer_cycles, limits.max_outer_cycles
        ));
    }

    if let AgentOutcome::Action(action) = &state.current_outcome
        && state.pending_input.is_none()
    {
        errors.push(format!(
            "current_outcome holds an undispatched action '{}'",
            action.tool
        ));
    }

    match (state.phase, state.stop) {
        (RunPhase::Done, None) => errors.push("phase is done but no stop reason".to_string()),
        (RunPhase::Done, Some(RunStop::AwaitingInput)) => {
            errors.push("phase is done but stop is awaiting_input".to_string());
        }
        (phase, Some(stop)) if phase != RunPhase::Done && stop != RunStop::AwaitingInput => {
            errors.push(format!("stop {stop:?} recorded while phase is {phase:?}"));
        }
        _ => {}
    }

    if state.stop == Some(RunStop::AwaitingInput) && state.pending_input.is_none() {
        errors.push("awaiting input but no pending question".to_string());
    }

    for path in state.content_store.dangling_latest() {
        errors.push(format!("content store latest pointer for {path} is dangling"));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_state::RunLimits;
    use crate::core::types::ActionRecord;
    use serde_json::Map;

    fn state() -> RunState {
        let mut state = RunState::new("run-test", "goal", RunLimits::default());
        state.install_plan(vec!["one".to_string()]);
        state
    }

    #[test]
    fn fresh_state_is_valid() {
        assert!(validate_invariants(&state()).is_empty());
    }

    #[test]
    fn cursor_past_queue_is_reported() {
        let mut state = state();
        state.task_cursor = 3;
        let errors = validate_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("task_cursor 3")));
    }

    #[test]
    fn undispatched_action_is_reported() {
        let mut state = state();
        state.current_outcome = AgentOutcome::Action(ActionRecord::new("ls", Map::new()));
        let errors = validate_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("undispatched action 'ls'")));
    }

    #[test]
    fn done_without_stop_is_reported() {
        let mut state = state();
        state.phase = RunPhase::Done;
        let errors = validate_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("no stop reason")));
    }

    #[test]
    fn awaiting_input_requires_a_question() {
        let mut state = state();
        state.phase = RunPhase::Executing;
        state.stop = Some(RunStop::AwaitingInput);
        let errors = validate_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("no pending question")));
    }
}
