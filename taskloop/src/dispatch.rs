//! Tool dispatcher: run the pending action exactly once and normalize the result.
//!
//! [`Dispatcher::dispatch`] is total. Every failure, from an unknown tool name
//! to a tool raising an error, comes back as an [`Observation`] with an
//! [`ErrorKind`]; nothing escapes as a panic or an `Err`.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::core::content_store::{ContentStore, Lookup, is_token};
use crate::core::errors::{
    ErrorKind, Phase, Propagation, SandboxViolation, UserInputRequired, classify_error,
    format_error,
};
use crate::core::run_state::RunState;
use crate::core::task_queue::insert_subtask;
use crate::core::types::{ActionRecord, Observation, PendingInput, ScratchEntry, ToolRecord};
use crate::io::config::ToolLimits;
use crate::io::review::UserInput;
use crate::io::sandbox::PathSandbox;
use crate::tools::request_user_input::answer_output;
use crate::tools::{HALLUCINATED_TOOL_NAMES, ToolContext, ToolOutput, ToolRegistry, ToolSpec};

const COMPONENT: &str = "TOOL_RUNNER";
const SUMMARY_CHARS: usize = 160;

/// Result of running the dispatch pipeline for one action.
enum Invocation {
    Observed(Observation),
    /// An interactive tool needs an answer from the main thread.
    Unwound(Observation, PendingInput),
}

pub struct Dispatcher<'a> {
    registry: &'a ToolRegistry,
    sandbox: &'a PathSandbox,
    limits: ToolLimits,
    input: Option<&'a dyn UserInput>,
    cancel: CancellationToken,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry, sandbox: &'a PathSandbox, limits: ToolLimits) -> Self {
        Self {
            registry,
            sandbox,
            limits,
            input: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, input: Option<&'a dyn UserInput>) -> Self {
        self.input = input;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Dispatch the action held in `state.current_outcome`.
    ///
    /// The slot is always cleared. The `(action, observation)` pair is appended
    /// to the scratchpad unless the tool unwound for user input, in which case
    /// the question is parked in `state.pending_input`.
    #[instrument(skip_all, fields(task_cursor = state.task_cursor))]
    pub fn dispatch(&self, state: &mut RunState) -> Observation {
        let Some(action) = state.current_outcome.take_action() else {
            warn!("dispatch called without a pending action");
            return tool_error("No pending action to dispatch.");
        };
        let task = state.current_task().unwrap_or_default().to_string();

        match self.invoke(&action, state) {
            Invocation::Unwound(observation, pending) => {
                info!(tool = %action.tool, question = %pending.question, "tool needs user input, unwinding");
                state.pending_input = Some(pending);
                observation
            }
            Invocation::Observed(observation) => {
                record(state, task, action, &observation);
                observation
            }
        }
    }

    fn invoke(&self, action: &ActionRecord, state: &mut RunState) -> Invocation {
        let name = action.tool.as_str();
        if self.cancel.is_cancelled() {
            info!(tool = name, "cancellation observed before tool invocation");
            return Invocation::Observed(failure(
                ErrorKind::Cancelled,
                &format!("Run cancelled before tool '{name}' was invoked."),
            ));
        }
        if HALLUCINATED_TOOL_NAMES.contains(&name) {
            warn!(tool = name, "rejected hallucinated tool name");
            return Invocation::Observed(tool_error(&format!(
                "'{name}' is not a real tool. Call exactly one tool per turn using a name from the tool list."
            )));
        }
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = name, "rejected unknown tool");
            return Invocation::Observed(tool_error(&format!(
                "Tool '{name}' not found in registry. Available tools: {}.",
                self.registry.names().join(", ")
            )));
        };
        let spec = tool.spec();

        if !state.repetition.check(name, &action.input, spec.effect) {
            warn!(tool = name, "blocked repeated tool call");
            return Invocation::Observed(failure(
                ErrorKind::ToolRepetition,
                &format!(
                    "Tool '{name}' was already called {} times with identical input among the last {} calls. Do not repeat it; change the input or try a different approach.",
                    state.repetition.threshold(),
                    state.repetition.capacity()
                ),
            ));
        }

        let mut input = action.input.clone();
        if let Err(violation) =
            self.resolve_paths(spec, &mut input, &state.allowed_external_paths)
        {
            warn!(tool = name, path = %violation.path, "sandbox violation");
            return Invocation::Observed(failure(
                ErrorKind::SandboxViolation,
                &violation.to_string(),
            ));
        }
        if let Err(message) = resolve_content_ref(&mut input, &state.content_store) {
            return Invocation::Observed(tool_error(&message));
        }

        let ctx = ToolContext {
            root: self.sandbox.root(),
            limits: self.limits,
            input: self.input,
        };
        debug!(tool = name, "invoking tool");
        match tool.run(&input, &ctx) {
            Ok(output) => Invocation::Observed(post_process(output, state)),
            Err(err) => {
                if let Some(required) = err.downcast_ref::<UserInputRequired>() {
                    let observation = failure(ErrorKind::UserInputRequired, &required.question);
                    return Invocation::Unwound(
                        observation,
                        PendingInput {
                            question: required.question.clone(),
                            suggested_responses: required.suggested_responses.clone(),
                            action: action.clone(),
                        },
                    );
                }
                warn!(tool = name, err = %format!("{err:#}"), "tool raised an error");
                Invocation::Observed(tool_error(&format!(
                    "Exception while running tool '{name}': {err:#}"
                )))
            }
        }
    }

    /// Replace every path-shaped string argument with its sandboxed absolute form.
    fn resolve_paths(
        &self,
        spec: &ToolSpec,
        input: &mut Map<String, Value>,
        allowed: &BTreeSet<String>,
    ) -> Result<(), SandboxViolation> {
        for (key, value) in input {
            if !spec.is_path_param(key) {
                continue;
            }
            let Value::String(raw) = value else {
                continue;
            };
            let resolved = self.sandbox.resolve(raw, allowed)?;
            *value = Value::String(resolved.to_string_lossy().into_owned());
        }
        Ok(())
    }
}

/// Record the user's answer as the observation of a parked `request_user_input` action.
pub fn record_user_answer(state: &mut RunState, pending: PendingInput, answer: &str) -> Observation {
    let task = state.current_task().unwrap_or_default().to_string();
    let observation = post_process(answer_output(&pending.question, answer), state);
    info!(question = %pending.question, "recorded user answer");
    record(state, task, pending.action, &observation);
    observation
}

/// Swap a `content_ref` argument (or a token passed as `content`) for the stored text.
fn resolve_content_ref(input: &mut Map<String, Value>, store: &ContentStore) -> Result<(), String> {
    let token = match (input.get("content_ref"), input.get("content")) {
        (Some(Value::String(token)), _) => token.clone(),
        (_, Some(Value::String(content))) if is_token(content) => content.clone(),
        _ => return Ok(()),
    };
    let lookup = store.resolve(&token).map_err(|err| err.to_string())?;
    if let Lookup::Corrected { token: fixed, .. } = &lookup {
        info!(requested = %token, resolved = %fixed, "corrected stale content reference");
    }
    let content = lookup.entry().content.clone();
    input.remove("content_ref");
    input.insert("content".to_string(), Value::String(content));
    Ok(())
}

/// Mint content tokens and apply queue mutations requested by the tool.
fn post_process(output: ToolOutput, state: &mut RunState) -> Observation {
    let ToolOutput {
        success,
        mut payload,
        file_content,
        queue_insertion,
    } = output;

    let mut content_ref = None;
    if let Some(file) = file_content {
        let token = state.content_store.put(&file.path, &file.content);
        debug!(path = %file.path, token = %token, "minted content reference");
        attach(&mut payload, "content_ref", Value::String(token.clone()));
        content_ref = Some(token);
    }

    if success && let Some(insertion) = queue_insertion {
        match insert_subtask(
            &mut state.task_queue,
            state.task_cursor,
            &mut state.created_subtasks,
            &insertion,
            state.limits.max_subtasks_per_task,
        ) {
            Ok(index) => {
                info!(task = %insertion.task, index, "inserted subtask");
                attach(&mut payload, "inserted_at", json!(index));
            }
            Err(message) => {
                warn!(task = %insertion.task, "subtask cap reached");
                return tool_error(&message);
            }
        }
    }

    let mut observation = match (success, payload) {
        (true, payload) => Observation::success(render_payload(&payload)),
        (false, Value::String(message)) => tool_error(&message),
        (false, payload) => Observation::failure(ErrorKind::ToolError, render_payload(&payload)),
    };
    observation.content_ref = content_ref;
    observation
}

fn record(state: &mut RunState, task: String, action: ActionRecord, observation: &Observation) {
    if let Some(kind) = observation.error_kind
        && kind.propagation(Phase::Reasoning) == Propagation::RecoverLocally
        && classify_error(&observation.payload) == Some(kind)
    {
        state.error_signal = Some(observation.payload.clone());
    }
    state.tool_history.push(ToolRecord {
        task,
        tool: action.tool.clone(),
        success: observation.success,
        summary: summarize(&observation.payload),
    });
    state.scratchpad.push(ScratchEntry {
        action,
        observation: observation.clone(),
    });
}

fn attach(payload: &mut Value, key: &str, value: Value) {
    match payload {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
        }
        other => {
            let result = std::mem::take(other);
            *other = json!({ "result": result, key: value });
        }
    }
}

fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn summarize(payload: &str) -> String {
    let first_line = payload.lines().next().unwrap_or_default();
    let mut summary: String = first_line.chars().take(SUMMARY_CHARS).collect();
    if summary.len() < payload.len() {
        summary.push_str("...");
    }
    summary
}

fn failure(kind: ErrorKind, message: &str) -> Observation {
    Observation::failure(kind, format_error(kind, message, COMPONENT))
}

fn tool_error(message: &str) -> Observation {
    failure(ErrorKind::ToolError, message)
}
