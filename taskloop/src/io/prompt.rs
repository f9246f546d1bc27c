//! Prompt builder for the planner, replanner and reasoning stages.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed order and the largest remaining section is cut in the
//! middle.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::run_state::RunState;
use crate::core::types::{CompletedTask, TaskStatus};
use crate::tools::ToolSpec;

use super::model::{ModelRequest, Stage, floor_char_boundary};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const REPLANNER_TEMPLATE: &str = include_str!("prompts/replanner.md");
const REACT_TEMPLATE: &str = include_str!("prompts/react.md");

const PLANNER_SYSTEM: &str = "You are the planner of an autonomous coding agent. You turn a goal into a short ordered list of subtasks. You never execute anything yourself.";
const REPLANNER_SYSTEM: &str = "You are the replanner of an autonomous coding agent. You review the work done so far and decide whether the goal is achieved or which subtasks remain.";
const REACT_SYSTEM: &str = "You are the executor of an autonomous coding agent. You complete one task by reasoning step by step and calling one tool per turn inside the project directory.";

/// Sections removed first when a prompt is over budget.
const DROP_ORDER: [&str; 4] = ["history", "original_plan", "previous", "tools"];
const TRUNCATION_MARKER: &str = "\n[... truncated ...]\n";

#[derive(Debug, Serialize)]
struct ToolView {
    name: &'static str,
    description: &'static str,
}

impl ToolView {
    fn list(tools: &[&ToolSpec]) -> Vec<Self> {
        tools
            .iter()
            .map(|spec| Self {
                name: spec.name,
                description: spec.description,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct CompletedView<'a> {
    task: &'a str,
    summary: &'a str,
    status: &'static str,
}

impl<'a> From<&'a CompletedTask> for CompletedView<'a> {
    fn from(done: &'a CompletedTask) -> Self {
        Self {
            task: &done.task,
            summary: &done.summary,
            status: match done.status {
                TaskStatus::Completed => "done",
                TaskStatus::GuardExceeded => "guard exceeded",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CallView<'a> {
    tool: &'a str,
    success: bool,
    summary: &'a str,
}

#[derive(Debug, Serialize)]
struct HistoryGroup<'a> {
    task: &'a str,
    calls: Vec<CallView<'a>>,
}

#[derive(Debug, Serialize)]
struct ContentView<'a> {
    token: &'a str,
    path: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct StepView<'a> {
    number: usize,
    tool: &'a str,
    input: String,
    status: String,
    payload: &'a str,
    content: Option<ContentView<'a>>,
}

/// Render the scratchpad, expanding each content token only at its latest occurrence.
fn step_views(state: &RunState) -> Vec<StepView<'_>> {
    let mut seen = BTreeSet::new();
    let mut steps: Vec<StepView<'_>> = state
        .scratchpad
        .iter()
        .enumerate()
        .rev()
        .map(|(i, entry)| {
            let observation = &entry.observation;
            let content = observation
                .content_ref
                .as_deref()
                .filter(|token| seen.insert(*token))
                .and_then(|token| {
                    state.content_store.get(token).map(|stored| ContentView {
                        token,
                        path: &stored.origin_path,
                        text: &stored.content,
                    })
                });
            StepView {
                number: i + 1,
                tool: &entry.action.tool,
                input: serde_json::Value::Object(entry.action.input.clone()).to_string(),
                status: match observation.error_kind {
                    None if observation.success => "ok".to_string(),
                    None => "failed".to_string(),
                    Some(kind) => kind.as_str().to_string(),
                },
                payload: &observation.payload,
                content,
            }
        })
        .collect();
    steps.reverse();
    steps
}

/// Group the run's tool history by task, preserving order.
fn history_groups(state: &RunState) -> Vec<HistoryGroup<'_>> {
    let mut groups: Vec<HistoryGroup<'_>> = Vec::new();
    for record in &state.tool_history {
        let call = CallView {
            tool: &record.tool,
            success: record.success,
            summary: &record.summary,
        };
        match groups.last_mut() {
            Some(group) if group.task == record.task => group.calls.push(call),
            _ => groups.push(HistoryGroup {
                task: &record.task,
                calls: vec![call],
            }),
        }
    }
    groups
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex is valid")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let required = kind.as_str() == "required";
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };
    if total(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let over = total(sections).saturating_sub(budget);
    if over == 0 {
        return;
    }
    if let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) {
        let before_len = largest.content.len();
        largest.content = cut_middle(&largest.content, before_len.saturating_sub(over));
        debug!(
            section = %largest.key,
            before_len,
            after_len = largest.content.len(),
            "truncated section for budget"
        );
    }
}

/// Shorten `text` to about `allowed` bytes, keeping its head and tail.
fn cut_middle(text: &str, allowed: usize) -> String {
    if text.len() <= allowed {
        return text.to_string();
    }
    if allowed <= TRUNCATION_MARKER.len() {
        return text[..floor_char_boundary(text, allowed)].to_string();
    }
    let keep = allowed - TRUNCATION_MARKER.len();
    let head = floor_char_boundary(text, keep / 2);
    let tail = ceil_char_boundary(text, text.len() - (keep - keep / 2));
    format!("{}{TRUNCATION_MARKER}{}", &text[..head], &text[tail..])
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut cut = index.min(text.len());
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    cut
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds stage prompts within a byte budget.
pub struct PromptBuilder {
    budget_bytes: usize,
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template is valid");
        env.add_template("replanner", REPLANNER_TEMPLATE)
            .expect("replanner template is valid");
        env.add_template("react", REACT_TEMPLATE)
            .expect("react template is valid");
        Self { budget_bytes, env }
    }

    /// Planning prompt: goal, pending feedback, and what the executors can do.
    pub fn plan(&self, state: &RunState, tools: &[&ToolSpec]) -> Result<ModelRequest> {
        let completed: Vec<CompletedView<'_>> =
            state.all_completed().map(CompletedView::from).collect();
        let ctx = context! {
            goal => state.goal.trim(),
            feedback => state.plan_feedback.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            completed => completed,
            tools => ToolView::list(tools),
        };
        self.build(Stage::Plan, PLANNER_SYSTEM, "planner", ctx)
    }

    /// Replanning prompt: goal, original plan, every completed task and the tool history.
    pub fn replan(&self, state: &RunState) -> Result<ModelRequest> {
        let completed: Vec<CompletedView<'_>> =
            state.all_completed().map(CompletedView::from).collect();
        let ctx = context! {
            goal => state.goal.trim(),
            reason => state.replan_reason.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            original_plan => &state.original_plan,
            completed => completed,
            history => history_groups(state),
        };
        self.build(Stage::Replan, REPLANNER_SYSTEM, "replanner", ctx)
    }

    /// Reasoning prompt for the current task.
    pub fn reason(
        &self,
        state: &RunState,
        error: Option<&str>,
        tools: &[&ToolSpec],
    ) -> Result<ModelRequest> {
        let previous = state.previous_summary().map(CompletedView::from);
        let ctx = context! {
            goal => state.goal.trim(),
            task => state.current_task().unwrap_or_default(),
            previous => previous,
            tools => ToolView::list(tools),
            steps => step_views(state),
            error => error.map(str::trim).filter(|s| !s.is_empty()),
        };
        self.build(Stage::Reason, REACT_SYSTEM, "react", ctx)
    }

    fn build(
        &self,
        stage: Stage,
        system: &str,
        template: &str,
        ctx: minijinja::Value,
    ) -> Result<ModelRequest> {
        let rendered = self
            .env
            .get_template(template)
            .and_then(|t| t.render(ctx))
            .with_context(|| format!("render {template} prompt"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(ModelRequest {
            stage,
            system: system.to_string(),
            user: render_sections(&sections),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_state::RunLimits;
    use crate::core::types::{ActionRecord, Observation, ScratchEntry, ToolRecord};
    use crate::tools::{ToolCategory, ToolRegistry};
    use serde_json::{Map, json};

    fn state() -> RunState {
        let mut state = RunState::new("run-test", "ship the feature", RunLimits::default());
        state.install_plan(vec!["write code".to_string(), "write docs".to_string()]);
        state
    }

    fn read_step(state: &mut RunState, path: &str, content: &str) -> String {
        let token = state.content_store.put(path, content);
        let mut input = Map::new();
        input.insert("path".to_string(), json!(path));
        let mut observation = Observation::success(json!({"path": path, "content_ref": token}).to_string());
        observation.content_ref = Some(token.clone());
        state.scratchpad.push(ScratchEntry {
            action: ActionRecord::new("read", input),
            observation,
        });
        token
    }

    #[test]
    fn reason_prompt_orders_sections() {
        let registry = ToolRegistry::builtin();
        let mut state = state();
        read_step(&mut state, "/p/a.txt", "alpha");
        let request = PromptBuilder::new(40_000)
            .reason(&state, Some("[TOOL_ERROR] boom"), &registry.specs_for(ToolCategory::Executor))
            .expect("prompt");

        assert_eq!(request.stage, Stage::Reason);
        let user = &request.user;
        let positions: Vec<usize> = ["<contract>", "<goal>", "<task>", "<tools>", "<scratchpad>", "<error>"]
            .iter()
            .map(|tag| user.find(tag).unwrap_or_else(|| panic!("missing {tag}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{user}");
        assert!(user.contains("write code"));
        assert!(user.contains("Observation (ok)"));
    }

    #[test]
    fn content_is_expanded_only_at_latest_occurrence() {
        let mut state = state();
        let token = read_step(&mut state, "/p/a.txt", "UNIQUE-BODY");
        read_step(&mut state, "/p/a.txt", "UNIQUE-BODY");

        let request = PromptBuilder::new(40_000)
            .reason(&state, None, &[])
            .expect("prompt");
        assert_eq!(request.user.matches("UNIQUE-BODY").count(), 1);
        assert!(request.user.matches(token.as_str()).count() >= 2);
        let body = request.user.find("UNIQUE-BODY").expect("body");
        let step_two = request.user.find("Step 2").expect("step 2");
        assert!(body > step_two);
    }

    #[test]
    fn previous_task_summary_is_included() {
        let mut state = state();
        state.complete_current("wrote lib.rs", TaskStatus::Completed);
        let request = PromptBuilder::new(40_000)
            .reason(&state, None, &[])
            .expect("prompt");
        assert!(request.user.contains("write code: wrote lib.rs"));
        assert!(request.user.contains("<task>\nwrite docs\n</task>"));
    }

    #[test]
    fn plan_prompt_carries_feedback() {
        let mut state = state();
        state.plan_feedback = Some("use sqlite".to_string());
        let request = PromptBuilder::new(40_000).plan(&state, &[]).expect("prompt");
        assert_eq!(request.stage, Stage::Plan);
        assert!(request.user.contains("<feedback>\nuse sqlite\n</feedback>"));
    }

    #[test]
    fn replan_prompt_groups_history_by_task() {
        let mut state = state();
        for (task, tool) in [("write code", "read"), ("write code", "write"), ("write docs", "ls")] {
            state.tool_history.push(ToolRecord {
                task: task.to_string(),
                tool: tool.to_string(),
                success: true,
                summary: "ok".to_string(),
            });
        }
        state.complete_current("done", TaskStatus::GuardExceeded);

        let request = PromptBuilder::new(40_000).replan(&state).expect("prompt");
        let user = &request.user;
        assert_eq!(user.matches("write code\n  - ").count(), 1, "{user}");
        assert!(user.contains("  - write (ok): ok"));
        assert!(user.contains("[guard exceeded] write code: done"));
        assert!(user.contains("1. write code"));
    }

    #[test]
    fn budget_drops_tools_before_truncating_scratchpad() {
        let registry = ToolRegistry::builtin();
        let mut state = state();
        read_step(&mut state, "/p/big.txt", &"x".repeat(3_000));

        let request = PromptBuilder::new(1_500)
            .reason(&state, None, &registry.specs_for(ToolCategory::Executor))
            .expect("prompt");
        assert!(!request.user.contains("<tools>"));
        assert!(request.user.contains("<contract>"));
        assert!(request.user.contains("<task>"));
        assert!(request.user.contains("[... truncated ...]"));
        assert!(request.user.ends_with("</scratchpad>"));
    }

    #[test]
    fn cut_middle_respects_char_boundaries() {
        let text = "é".repeat(100);
        let cut = cut_middle(&text, 60);
        assert!(cut.len() <= 60 + 1);
        assert!(cut.starts_with('é'));
        assert!(cut.ends_with('é'));
        assert!(cut.contains("truncated"));
    }
}
