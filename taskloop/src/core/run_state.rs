//! The single mutable record threaded through a run.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::content_store::ContentStore;
use super::repetition::RepetitionDetector;
use super::types::{
    AgentOutcome, CompletedTask, PendingInput, RunPhase, RunStop, ScratchEntry, TaskStatus,
    ToolRecord,
};

/// Limits fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    pub max_inner_cycles: u32,
    pub max_outer_cycles: u32,
    /// Reasoning turns allowed per installed plan.
    pub recursion_limit: u32,
    pub repetition_threshold: usize,
    pub repetition_window: usize,
    pub max_subtasks_per_task: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_inner_cycles: 20,
            max_outer_cycles: 5,
            recursion_limit: 250,
            repetition_threshold: 3,
            repetition_window: 5,
            max_subtasks_per_task: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub goal: String,
    pub phase: RunPhase,
    pub limits: RunLimits,

    pub task_queue: Vec<String>,
    pub task_cursor: usize,
    /// Completed tasks of the current plan.
    pub completed_tasks: Vec<CompletedTask>,
    /// Completed tasks of superseded plans, oldest first.
    #[serde(default)]
    pub archived_tasks: Vec<CompletedTask>,
    #[serde(default)]
    pub original_plan: Vec<String>,
    #[serde(default)]
    pub plan_feedback: Option<String>,
    #[serde(default)]
    pub replan_reason: Option<String>,

    pub scratchpad: Vec<ScratchEntry>,
    #[serde(default)]
    pub current_outcome: AgentOutcome,
    pub inner_cycles: u32,
    pub outer_cycles: u32,
    /// Reasoning turns since the current plan was installed.
    pub plan_steps: u32,
    #[serde(default)]
    pub error_signal: Option<String>,

    pub content_store: ContentStore,
    pub repetition: RepetitionDetector,
    pub allowed_external_paths: BTreeSet<String>,
    /// Subtasks created per originating cursor position in the current plan.
    #[serde(default)]
    pub created_subtasks: BTreeMap<usize, usize>,
    #[serde(default)]
    pub tool_history: Vec<ToolRecord>,

    #[serde(default)]
    pub pending_input: Option<PendingInput>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub stop: Option<RunStop>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, goal: impl Into<String>, limits: RunLimits) -> Self {
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            phase: RunPhase::Planning,
            limits,
            task_queue: Vec::new(),
            task_cursor: 0,
            completed_tasks: Vec::new(),
            archived_tasks: Vec::new(),
            original_plan: Vec::new(),
            plan_feedback: None,
            replan_reason: None,
            scratchpad: Vec::new(),
            current_outcome: AgentOutcome::Empty,
            inner_cycles: 0,
            outer_cycles: 0,
            plan_steps: 0,
            error_signal: None,
            content_store: ContentStore::new(),
            repetition: RepetitionDetector::new(
                limits.repetition_threshold,
                limits.repetition_window,
            ),
            allowed_external_paths: BTreeSet::new(),
            created_subtasks: BTreeMap::new(),
            tool_history: Vec::new(),
            pending_input: None,
            response: None,
            stop: None,
        }
    }

    pub fn current_task(&self) -> Option<&str> {
        self.task_queue.get(self.task_cursor).map(String::as_str)
    }

    /// Sanction an external path. The set only grows.
    pub fn allow_external_path(&mut self, path: impl Into<String>) {
        self.allowed_external_paths.insert(path.into());
    }

    /// Replace the queue with a freshly generated plan.
    ///
    /// Completed tasks of the previous plan move to the archive so the
    /// replanner still sees the whole run.
    pub fn install_plan(&mut self, tasks: Vec<String>) {
        if self.original_plan.is_empty() {
            self.original_plan = tasks.clone();
        }
        self.archived_tasks.append(&mut self.completed_tasks);
        self.task_queue = tasks;
        self.task_cursor = 0;
        self.created_subtasks.clear();
        self.plan_steps = 0;
        self.replan_reason = None;
        self.begin_task();
    }

    /// Drop the queue without archiving, e.g. after plan feedback or cancel.
    pub fn clear_queue(&mut self) {
        self.task_queue.clear();
        self.task_cursor = 0;
        self.created_subtasks.clear();
    }

    /// Reset per-task state before the inner loop starts a task.
    pub fn begin_task(&mut self) {
        self.scratchpad.clear();
        self.inner_cycles = 0;
        self.error_signal = None;
        self.current_outcome = AgentOutcome::Empty;
        self.repetition.reset();
    }

    /// Record the current task as done and move the cursor.
    ///
    /// Returns true when the queue is exhausted.
    pub fn complete_current(&mut self, summary: impl Into<String>, status: TaskStatus) -> bool {
        if let Some(task) = self.current_task().map(str::to_string) {
            self.completed_tasks.push(CompletedTask {
                task,
                summary: summary.into(),
                status,
            });
            self.task_cursor += 1;
        }
        self.current_outcome = AgentOutcome::Empty;
        self.task_cursor >= self.task_queue.len()
    }

    /// Consume the last unrecovered error, if any.
    pub fn take_error_signal(&mut self) -> Option<String> {
        self.error_signal.take()
    }

    /// Summary of the task completed just before the current one.
    pub fn previous_summary(&self) -> Option<&CompletedTask> {
        self.completed_tasks.last()
    }

    /// Every completed task of the run, oldest first.
    pub fn all_completed(&self) -> impl Iterator<Item = &CompletedTask> {
        self.archived_tasks.iter().chain(&self.completed_tasks)
    }

    /// End the run with a terminal response.
    pub fn finish(&mut self, response: impl Into<String>, stop: RunStop) {
        self.phase = RunPhase::Done;
        self.response = Some(response.into());
        self.stop = Some(stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new("run-test", "goal", RunLimits::default())
    }

    fn tasks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn completing_every_task_leaves_cursor_at_queue_length() {
        let mut state = state();
        let plan = tasks(&["one", "two", "three"]);
        state.install_plan(plan.clone());

        let mut exhausted = false;
        for task in &plan {
            assert_eq!(state.current_task(), Some(task.as_str()));
            exhausted = state.complete_current(format!("{task} done"), TaskStatus::Completed);
        }
        assert!(exhausted);
        assert_eq!(state.task_cursor, plan.len());
        let done: Vec<&str> = state.completed_tasks.iter().map(|c| c.task.as_str()).collect();
        assert_eq!(done, vec!["one", "two", "three"]);
        assert_eq!(state.current_task(), None);
    }

    #[test]
    fn install_plan_archives_previous_completions_and_keeps_original() {
        let mut state = state();
        state.install_plan(tasks(&["first"]));
        state.complete_current("ok", TaskStatus::Completed);
        state.plan_steps = 7;
        state.created_subtasks.insert(0, 2);

        state.install_plan(tasks(&["second"]));
        assert_eq!(state.original_plan, tasks(&["first"]));
        assert!(state.completed_tasks.is_empty());
        assert_eq!(state.archived_tasks.len(), 1);
        assert_eq!(state.task_cursor, 0);
        assert_eq!(state.plan_steps, 0);
        assert!(state.created_subtasks.is_empty());
        assert_eq!(state.all_completed().count(), 1);
    }

    #[test]
    fn begin_task_resets_per_task_state() {
        let mut state = state();
        state.install_plan(tasks(&["one"]));
        state.inner_cycles = 4;
        state.error_signal = Some("[PARSING_ERROR] nope".to_string());
        state.begin_task();
        assert_eq!(state.inner_cycles, 0);
        assert!(state.error_signal.is_none());
        assert!(state.scratchpad.is_empty());
    }

    #[test]
    fn error_signal_is_consumed_once() {
        let mut state = state();
        state.error_signal = Some("boom".to_string());
        assert_eq!(state.take_error_signal().as_deref(), Some("boom"));
        assert_eq!(state.take_error_signal(), None);
    }

    #[test]
    fn finish_marks_run_done() {
        let mut state = state();
        state.finish("all done", RunStop::Completed);
        assert_eq!(state.phase, RunPhase::Done);
        assert_eq!(state.response.as_deref(), Some("all done"));
        assert!(state.is_stopped());
    }
}
