//! Inner reason-act-observe loop for one task.
//!
//! Each turn asks the model for a decision, dispatches at most one action and
//! feeds recoverable failures back through `error_signal`. The loop only
//! returns on a final answer, a replan request, a guard, cancellation, or a
//! tool that needs user input.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::errors::{ErrorKind, format_error};
use crate::core::run_state::RunState;
use crate::core::types::{AgentOutcome, Decision, DecisionKind};
use crate::dispatch::Dispatcher;
use crate::io::model::{ModelClient, Stage, decode_response};
use crate::io::prompt::PromptBuilder;
use crate::tools::{ToolCategory, ToolRegistry};

const COMPONENT: &str = "REASONING";

/// How a task left the inner loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    Finished { summary: String },
    /// The inner-cycle guard fired; reported as a soft failure.
    GuardExceeded { message: String },
    ReplanRequested { reason: String },
    /// The per-plan step budget is spent.
    RecursionLimit,
    Cancelled,
    /// A tool unwound with a question; see `RunState::pending_input`.
    AwaitingInput,
}

impl TaskExit {
    pub fn label(&self) -> &'static str {
        match self {
            TaskExit::Finished { .. } => "finished",
            TaskExit::GuardExceeded { .. } => "guard_exceeded",
            TaskExit::ReplanRequested { .. } => "replan_requested",
            TaskExit::RecursionLimit => "recursion_limit",
            TaskExit::Cancelled => "cancelled",
            TaskExit::AwaitingInput => "awaiting_input",
        }
    }
}

pub struct Reasoner<'a, M: ModelClient> {
    model: &'a M,
    prompts: &'a PromptBuilder,
    registry: &'a ToolRegistry,
    dispatcher: &'a Dispatcher<'a>,
}

impl<'a, M: ModelClient> Reasoner<'a, M> {
    pub fn new(
        model: &'a M,
        prompts: &'a PromptBuilder,
        registry: &'a ToolRegistry,
        dispatcher: &'a Dispatcher<'a>,
    ) -> Self {
        Self {
            model,
            prompts,
            registry,
            dispatcher,
        }
    }

    /// Run the current task until it exits.
    ///
    /// Per-task state must already be reset (`RunState::begin_task`); a
    /// resumed task continues with its existing scratchpad and counters.
    pub fn run_task(&self, state: &mut RunState) -> Result<TaskExit> {
        let tools = self.registry.specs_for(ToolCategory::Executor);
        info!(
            task = state.current_task().unwrap_or_default(),
            cursor = state.task_cursor,
            inner_cycles = state.inner_cycles,
            "running task"
        );

        loop {
            if self.dispatcher.is_cancelled() {
                info!(cycles = state.inner_cycles, "cancellation observed before reasoning turn");
                return Ok(TaskExit::Cancelled);
            }
            state.inner_cycles += 1;
            state.plan_steps += 1;

            if state.inner_cycles > state.limits.max_inner_cycles {
                let message = format!(
                    "Stopped: task exceeded {} reasoning cycles without a final answer.",
                    state.limits.max_inner_cycles
                );
                warn!(max = state.limits.max_inner_cycles, "inner cycle guard hit");
                state.current_outcome = AgentOutcome::FinalAnswer {
                    text: message.clone(),
                };
                return Ok(TaskExit::GuardExceeded { message });
            }
            if state.plan_steps > state.limits.recursion_limit {
                warn!(limit = state.limits.recursion_limit, "step limit for plan reached");
                return Ok(TaskExit::RecursionLimit);
            }

            let error = state.take_error_signal();
            let request = self.prompts.reason(state, error.as_deref(), &tools)?;
            let value = match self.model.complete(&request) {
                Ok(value) => value,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "model call failed during reasoning");
                    state.error_signal = Some(format_error(
                        ErrorKind::LlmError,
                        &format!("Model call failed: {err:#}"),
                        COMPONENT,
                    ));
                    continue;
                }
            };
            let decision: Decision = match decode_response(&value, Stage::Reason) {
                Ok(decision) => decision,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "undecodable decision");
                    state.error_signal = Some(format_error(
                        ErrorKind::ParsingError,
                        &format!("{err:#}"),
                        COMPONENT,
                    ));
                    continue;
                }
            };
            if let Some(thought) = decision.thought.as_deref() {
                debug!(thought, "model thought");
            }

            match decision.classify() {
                DecisionKind::Replan(reason) => {
                    info!(reason = %reason, "model requested replanning");
                    return Ok(TaskExit::ReplanRequested { reason });
                }
                DecisionKind::FinalAnswer(text) => {
                    info!(cycles = state.inner_cycles, "task finished");
                    state.current_outcome = AgentOutcome::FinalAnswer { text: text.clone() };
                    return Ok(TaskExit::Finished { summary: text });
                }
                DecisionKind::Action(action) => {
                    debug!(tool = %action.tool, "dispatching action");
                    state.current_outcome = AgentOutcome::Action(action);
                    let observation = self.dispatcher.dispatch(state);
                    match observation.error_kind {
                        Some(ErrorKind::Cancelled) => return Ok(TaskExit::Cancelled),
                        Some(ErrorKind::UserInputRequired) => return Ok(TaskExit::AwaitingInput),
                        _ => {}
                    }
                }
                DecisionKind::Empty => {
                    state.error_signal = Some(format_error(
                        ErrorKind::ParsingError,
                        "Response had neither an action nor a final_answer. Provide exactly one.",
                        COMPONENT,
                    ));
                }
                DecisionKind::Ambiguous => {
                    state.error_signal = Some(format_error(
                        ErrorKind::ParsingError,
                        "Response had both an action and a final_answer. Provide exactly one.",
                        COMPONENT,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::core::run_state::RunLimits;
    use crate::io::config::EngineConfig;
    use crate::io::sandbox::PathSandbox;
    use crate::test_support::{ScriptedModelClient, action, final_answer, replan_request};
    use serde_json::json;

    struct Harness {
        temp: tempfile::TempDir,
        sandbox: PathSandbox,
        registry: ToolRegistry,
        prompts: PromptBuilder,
    }

    impl Harness {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let sandbox = PathSandbox::new(temp.path()).expect("sandbox");
            Self {
                temp,
                sandbox,
                registry: ToolRegistry::builtin(),
                prompts: PromptBuilder::new(40_000),
            }
        }

        fn run(&self, model: &ScriptedModelClient, state: &mut RunState) -> TaskExit {
            let dispatcher = Dispatcher::new(
                &self.registry,
                &self.sandbox,
                EngineConfig::default().tool_limits(),
            );
            Reasoner::new(model, &self.prompts, &self.registry, &dispatcher)
                .run_task(state)
                .expect("run task")
        }
    }

    fn state(limits: RunLimits) -> RunState {
        let mut state = RunState::new("run-test", "goal", limits);
        state.install_plan(vec!["create a.txt".to_string()]);
        state
    }

    #[test]
    fn action_then_final_answer_finishes() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        model.push(Stage::Reason, action("write", json!({"path": "a.txt", "content": "X"})));
        model.push(Stage::Reason, final_answer("wrote a.txt"));
        let mut state = state(RunLimits::default());

        let exit = harness.run(&model, &mut state);
        assert_eq!(exit, TaskExit::Finished { summary: "wrote a.txt".to_string() });
        assert_eq!(state.scratchpad.len(), 1);
        assert_eq!(state.inner_cycles, 2);
        assert!(harness.temp.path().join("a.txt").exists());
    }

    #[test]
    fn guard_emits_one_final_answer_and_stops_dispatching() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        for i in 0..5 {
            model.push(Stage::Reason, action("ls", json!({"path": ".", "n": i})));
        }
        let limits = RunLimits {
            max_inner_cycles: 3,
            ..RunLimits::default()
        };
        let mut state = state(limits);

        let exit = harness.run(&model, &mut state);
        assert!(matches!(exit, TaskExit::GuardExceeded { .. }));
        assert_eq!(state.scratchpad.len(), 3);
        assert_eq!(model.requests_for(Stage::Reason).len(), 3);
        assert!(matches!(state.current_outcome, AgentOutcome::FinalAnswer { .. }));
    }

    #[test]
    fn malformed_decision_becomes_parsing_error_signal() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        model.push(Stage::Reason, json!({"nonsense": true}));
        model.push(Stage::Reason, final_answer("done"));
        let mut state = state(RunLimits::default());

        let exit = harness.run(&model, &mut state);
        assert!(matches!(exit, TaskExit::Finished { .. }));
        let second = &model.requests_for(Stage::Reason)[1];
        assert!(second.user.contains("[REASONING] [PARSING_ERROR]"));
    }

    #[test]
    fn model_failure_is_retried_next_turn() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        model.push_error(Stage::Reason, "connection reset");
        model.push(Stage::Reason, final_answer("done"));
        let mut state = state(RunLimits::default());

        let exit = harness.run(&model, &mut state);
        assert!(matches!(exit, TaskExit::Finished { .. }));
        let second = &model.requests_for(Stage::Reason)[1];
        assert!(second.user.contains("[LLM_ERROR]"));
        assert!(second.user.contains("connection reset"));
    }

    #[test]
    fn replan_reason_exits_immediately() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        model.push(Stage::Reason, replan_request("the file is generated"));
        let mut state = state(RunLimits::default());

        let exit = harness.run(&model, &mut state);
        assert_eq!(
            exit,
            TaskExit::ReplanRequested {
                reason: "the file is generated".to_string()
            }
        );
    }

    #[test]
    fn cancelled_token_stops_before_the_model_call() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        model.push(Stage::Reason, final_answer("done"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = Dispatcher::new(
            &harness.registry,
            &harness.sandbox,
            EngineConfig::default().tool_limits(),
        )
        .with_cancellation(cancel);
        let mut state = state(RunLimits::default());

        let exit = Reasoner::new(&model, &harness.prompts, &harness.registry, &dispatcher)
            .run_task(&mut state)
            .expect("run task");
        assert_eq!(exit, TaskExit::Cancelled);
        assert!(model.requests().is_empty());
        assert_eq!(state.inner_cycles, 0);
    }

    #[test]
    fn step_limit_routes_to_replanning() {
        let harness = Harness::new();
        let model = ScriptedModelClient::new();
        let limits = RunLimits {
            recursion_limit: 2,
            ..RunLimits::default()
        };
        let mut state = state(limits);
        state.plan_steps = 2;

        let exit = harness.run(&model, &mut state);
        assert_eq!(exit, TaskExit::RecursionLimit);
        assert!(model.requests_for(Stage::Reason).is_empty());
    }
}
