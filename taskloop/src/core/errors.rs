//! Error taxonomy shared by the orchestration loops and the tool dispatcher.
//!
//! Errors that reach the model are rendered as tagged strings of the form
//! `[COMPONENT] [KIND] message` so the next reasoning turn can self-correct.
//! Errors that the orchestrator must branch on are typed structs recovered via
//! `anyhow::Error::downcast_ref`.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of failure observed during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Model output did not match the expected decision schema.
    ParsingError,
    /// Tool invocation failed or named a tool that does not exist.
    ToolError,
    /// Blocked by the repetition detector.
    ToolRepetition,
    /// Blocked by the path sandbox.
    SandboxViolation,
    /// Explicit request to abandon the current task and re-plan.
    ReplanRequested,
    /// The per-plan step guard was hit.
    GraphRecursion,
    /// The model client boundary failed.
    LlmError,
    /// Cancellation was observed at a tool invocation.
    Cancelled,
    /// An interactive tool needs input from the session's main thread.
    UserInputRequired,
}

/// Where in the run an error was observed; propagation depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Reasoning,
    Replanning,
}

/// How an error travels once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Becomes the next error signal for the reasoning turn.
    RecoverLocally,
    /// Surfaced to the outer loop, which re-plans immediately.
    Replan,
    /// Ends the run with a terminal response.
    Fatal,
    /// Leaves the inner loop without a verdict (cancellation, user input).
    Unwind,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::ParsingError,
        ErrorKind::ToolError,
        ErrorKind::ToolRepetition,
        ErrorKind::SandboxViolation,
        ErrorKind::ReplanRequested,
        ErrorKind::GraphRecursion,
        ErrorKind::LlmError,
        ErrorKind::Cancelled,
        ErrorKind::UserInputRequired,
    ];

    /// Stable tag used inside model-facing error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ParsingError => "PARSING_ERROR",
            ErrorKind::ToolError => "TOOL_ERROR",
            ErrorKind::ToolRepetition => "TOOL_REPETITION",
            ErrorKind::SandboxViolation => "SANDBOX_VIOLATION",
            ErrorKind::ReplanRequested => "REPLAN_REQUESTED",
            ErrorKind::GraphRecursion => "GRAPH_RECURSION",
            ErrorKind::LlmError => "LLM_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::UserInputRequired => "USER_INPUT_REQUIRED",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Propagation policy for this kind when observed in `phase`.
    ///
    /// Planning and replanning have no error signal to feed back, so anything
    /// that is neither an unwind nor a replan request ends the run there.
    pub fn propagation(self, phase: Phase) -> Propagation {
        match (self, phase) {
            (ErrorKind::Cancelled | ErrorKind::UserInputRequired, _) => Propagation::Unwind,
            (ErrorKind::ReplanRequested | ErrorKind::GraphRecursion, _) => Propagation::Replan,
            (_, Phase::Planning | Phase::Replanning) => Propagation::Fatal,
            (_, Phase::Reasoning) => Propagation::RecoverLocally,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a model-facing error message: `[COMPONENT] [KIND] message`.
///
/// An empty `component` omits the component tag.
pub fn format_error(kind: ErrorKind, message: &str, component: &str) -> String {
    if component.is_empty() {
        format!("[{}] {}", kind.as_str(), message)
    } else {
        format!("[{}] [{}] {}", component, kind.as_str(), message)
    }
}

/// Recover the error kind from a tagged message, if any tag matches.
pub fn classify_error(message: &str) -> Option<ErrorKind> {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([A-Z_]+)\]").expect("tag regex is valid"));

    TAG_RE
        .captures_iter(message)
        .filter_map(|caps| caps.get(1))
        .find_map(|tag| ErrorKind::from_tag(tag.as_str()))
}

/// A path argument resolved outside the sanctioned boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxViolation {
    /// The literal path the tool call supplied.
    pub path: String,
    /// Canonical project root the path was checked against.
    pub boundary: PathBuf,
    pub reason: String,
}

impl fmt::Display for SandboxViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Access denied: '{}' is outside the project directory '{}' ({})",
            self.path,
            self.boundary.display(),
            self.reason
        )
    }
}

impl std::error::Error for SandboxViolation {}

/// Raised by interactive tools when no input function was injected.
///
/// The dispatcher turns it into a pending question that unwinds the inner loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInputRequired {
    pub question: String,
    pub suggested_responses: Vec<String>,
}

impl fmt::Display for UserInputRequired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user input required: {}", self.question)
    }
}

impl std::error::Error for UserInputRequired {}

/// Model output that failed schema validation or deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub schema: &'static str,
    pub messages: Vec<String>,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "response does not match {} schema: {}",
            self.schema,
            self.messages.join("; ")
        )
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_includes_component_and_kind() {
        let msg = format_error(ErrorKind::ToolError, "boom", "TOOL_RUNNER");
        assert_eq!(msg, "[TOOL_RUNNER] [TOOL_ERROR] boom");
        let bare = format_error(ErrorKind::ParsingError, "bad json", "");
        assert_eq!(bare, "[PARSING_ERROR] bad json");
    }

    #[test]
    fn classify_skips_component_tags() {
        let msg = format_error(ErrorKind::SandboxViolation, "denied", "TOOL_RUNNER");
        assert_eq!(classify_error(&msg), Some(ErrorKind::SandboxViolation));
        assert_eq!(classify_error("no tags here"), None);
        assert_eq!(classify_error("[REACT] nothing known"), None);
    }

    #[test]
    fn every_kind_round_trips_through_its_tag() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_tag(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn llm_error_is_fatal_only_outside_reasoning() {
        assert_eq!(
            ErrorKind::LlmError.propagation(Phase::Reasoning),
            Propagation::RecoverLocally
        );
        assert_eq!(
            ErrorKind::LlmError.propagation(Phase::Planning),
            Propagation::Fatal
        );
        assert_eq!(
            ErrorKind::LlmError.propagation(Phase::Replanning),
            Propagation::Fatal
        );
        assert_eq!(
            ErrorKind::GraphRecursion.propagation(Phase::Reasoning),
            Propagation::Replan
        );
        assert_eq!(
            ErrorKind::ToolRepetition.propagation(Phase::Reasoning),
            Propagation::RecoverLocally
        );
    }

    #[test]
    fn malformed_plans_are_fatal_but_malformed_decisions_recover() {
        assert_eq!(
            ErrorKind::ParsingError.propagation(Phase::Planning),
            Propagation::Fatal
        );
        assert_eq!(
            ErrorKind::ParsingError.propagation(Phase::Replanning),
            Propagation::Fatal
        );
        assert_eq!(
            ErrorKind::ParsingError.propagation(Phase::Reasoning),
            Propagation::RecoverLocally
        );
        for phase in [Phase::Planning, Phase::Reasoning, Phase::Replanning] {
            assert_eq!(ErrorKind::Cancelled.propagation(phase), Propagation::Unwind);
            assert_eq!(
                ErrorKind::ReplanRequested.propagation(phase),
                Propagation::Replan
            );
        }
    }

    #[test]
    fn sandbox_violation_message_names_path_and_boundary() {
        let err = SandboxViolation {
            path: "/etc/hosts".to_string(),
            boundary: PathBuf::from("/work/project"),
            reason: "not under project root".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Access denied"));
        assert!(msg.contains("/etc/hosts"));
        assert!(msg.contains("/work/project"));
        assert!(msg.contains("outside the project directory"));
    }
}
