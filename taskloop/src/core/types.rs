//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the loops, the dispatcher and
//! the persisted snapshot. They must not depend on external state or I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::ErrorKind;

/// One tool call requested by the model. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub tool: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl ActionRecord {
    pub fn new(tool: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            input,
        }
    }
}

/// Normalized result of one tool call; always a value, never a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Token minted for file content produced by this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_ref: Option<String>,
}

impl Observation {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            success: true,
            payload: payload.into(),
            error_kind: None,
            content_ref: None,
        }
    }

    pub fn failure(kind: ErrorKind, payload: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: payload.into(),
            error_kind: Some(kind),
            content_ref: None,
        }
    }
}

/// The single pending-outcome slot of the inner loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutcome {
    #[default]
    Empty,
    Action(ActionRecord),
    FinalAnswer {
        text: String,
    },
}

impl AgentOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, AgentOutcome::Empty)
    }

    /// Take the pending action, leaving the slot empty. Other outcomes stay put.
    pub fn take_action(&mut self) -> Option<ActionRecord> {
        match std::mem::take(self) {
            AgentOutcome::Action(action) => Some(action),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// One `(action, observation)` pair of a task's scratchpad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchEntry {
    pub action: ActionRecord,
    pub observation: Observation,
}

/// How a task left the inner loop when it was recorded as completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    GuardExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task: String,
    pub summary: String,
    pub status: TaskStatus,
}

/// One entry of the run-wide tool execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub task: String,
    pub tool: String,
    pub success: bool,
    pub summary: String,
}

/// Side effect class of a tool; drives repetition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    ReadOnly,
    Write,
    Command,
    Interactive,
    Queue,
}

/// Where `create_subtask` places a new task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    #[default]
    AfterCurrent,
    EndOfQueue,
}

impl InsertPosition {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "after_current" => Some(InsertPosition::AfterCurrent),
            "end_of_queue" => Some(InsertPosition::EndOfQueue),
            _ => None,
        }
    }
}

/// A task-queue mutation requested by a tool and applied by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInsertion {
    pub task: String,
    pub position: InsertPosition,
}

/// Outer loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Verifying,
    Executing,
    Replanning,
    Done,
}

/// Why a run stopped producing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStop {
    /// The replanner judged the goal complete.
    Completed,
    /// The outer guard was exceeded.
    GuardExceeded,
    /// Planning or replanning failed at the model boundary.
    ModelFailure,
    /// The user cancelled at verification, or the cancellation token fired.
    Cancelled,
    /// An interactive tool is waiting for an answer; the run can resume.
    AwaitingInput,
}

impl RunStop {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStop::AwaitingInput)
    }
}

/// Question raised by `request_user_input` while no input function was present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
    pub question: String,
    #[serde(default)]
    pub suggested_responses: Vec<String>,
    /// The action that raised the question; its observation is the answer.
    pub action: ActionRecord,
}

/// Planner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResponse {
    pub subtasks: Vec<String>,
}

/// Replanner output. Empty `tasks` means the goal is achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplanResponse {
    pub tasks: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Raw reasoning-turn output as decoded from the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub action_input: Option<Map<String, Value>>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub replan_reason: Option<String>,
}

/// A decision reduced to exactly one meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionKind {
    Action(ActionRecord),
    FinalAnswer(String),
    Replan(String),
    /// Neither an action nor a final answer.
    Empty,
    /// Both an action and a final answer.
    Ambiguous,
}

impl Decision {
    pub fn classify(self) -> DecisionKind {
        if let Some(reason) = non_blank(self.replan_reason) {
            return DecisionKind::Replan(reason);
        }
        let action = non_blank(self.action);
        let answer = non_blank(self.final_answer);
        match (action, answer) {
            (Some(_), Some(_)) => DecisionKind::Ambiguous,
            (Some(tool), None) => {
                DecisionKind::Action(ActionRecord::new(tool, self.action_input.unwrap_or_default()))
            }
            (None, Some(text)) => DecisionKind::FinalAnswer(text),
            (None, None) => DecisionKind::Empty,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
