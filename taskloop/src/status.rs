//! Human-readable summary of a persisted run for `taskloop status`.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;

use crate::core::run_state::RunState;
use crate::io::init::TaskloopPaths;
use crate::io::snapshot::load_snapshot;
use crate::io::transcript::list_transcripts;

/// Load the snapshot under `root` and render it, or `None` when no run exists.
pub fn status_from_root(root: &Path) -> Result<Option<String>> {
    let paths = TaskloopPaths::new(root);
    if !paths.snapshot_path.exists() {
        return Ok(None);
    }
    let state = load_snapshot(&paths.snapshot_path)?;
    let transcripts = list_transcripts(&paths.run_dir(&state.run_id))?.len();
    Ok(Some(render_status(&state, transcripts)))
}

pub fn render_status(state: &RunState, transcripts: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run: {}", state.run_id);
    let _ = writeln!(out, "goal: {}", state.goal);
    let _ = writeln!(out, "phase: {:?}", state.phase);
    let _ = writeln!(
        out,
        "task: {}/{} (outer cycle {}, inner cycle {})",
        state.task_cursor.min(state.task_queue.len()),
        state.task_queue.len(),
        state.outer_cycles,
        state.inner_cycles
    );
    for (i, task) in state.task_queue.iter().enumerate() {
        let marker = match i.cmp(&state.task_cursor) {
            std::cmp::Ordering::Less => "x",
            std::cmp::Ordering::Equal => ">",
            std::cmp::Ordering::Greater => " ",
        };
        let _ = writeln!(out, "  [{marker}] {}. {task}", i + 1);
    }
    let archived = state.archived_tasks.len();
    if archived > 0 {
        let _ = writeln!(out, "earlier plans: {archived} completed tasks");
    }
    let _ = writeln!(out, "tool calls: {}", state.tool_history.len());
    let _ = writeln!(out, "transcripts: {transcripts}");
    match state.stop {
        Some(stop) => {
            let _ = writeln!(out, "stop: {stop:?}");
        }
        None => {
            let _ = writeln!(out, "stop: (running or interrupted)");
        }
    }
    if let Some(pending) = &state.pending_input {
        let _ = writeln!(out, "waiting for answer: {}", pending.question);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_state::RunLimits;
    use crate::core::types::TaskStatus;
    use crate::io::snapshot::write_snapshot;

    #[test]
    fn marks_done_current_and_pending_tasks() {
        let mut state = RunState::new("run-1", "ship", RunLimits::default());
        state.install_plan(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        state.complete_current("ok", TaskStatus::Completed);

        let text = render_status(&state, 1);
        assert!(text.contains("task: 1/3"));
        assert!(text.contains("  [x] 1. a"));
        assert!(text.contains("  [>] 2. b"));
        assert!(text.contains("  [ ] 3. c"));
        assert!(text.contains("transcripts: 1"));
    }

    #[test]
    fn status_without_snapshot_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(status_from_root(temp.path()).expect("status").is_none());
    }

    #[test]
    fn status_reads_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TaskloopPaths::new(temp.path());
        let state = RunState::new("run-7", "goal", RunLimits::default());
        write_snapshot(&paths.snapshot_path, &state).expect("write");

        let text = status_from_root(temp.path()).expect("status").expect("some");
        assert!(text.contains("run: run-7"));
        assert!(text.contains("phase: Planning"));
    }
}
