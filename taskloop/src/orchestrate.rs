//! Outer plan / verify / execute / replan loop.
//!
//! The orchestrator owns the [`RunState`] for the duration of a run and
//! drives it through [`RunPhase`] transitions until a stop reason is set.
//! Every transition is checkpointed when a snapshot store is attached, and
//! every task exit leaves a transcript under `.taskloop/runs/<run_id>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::core::errors::{DecodeError, ErrorKind, Phase, Propagation, format_error};
use crate::core::run_state::RunState;
use crate::core::types::{
    AgentOutcome, PlanResponse, ReplanResponse, RunPhase, RunStop, TaskStatus,
};
use crate::dispatch::{Dispatcher, record_user_answer};
use crate::io::config::EngineConfig;
use crate::io::model::{ModelClient, Stage, decode_response};
use crate::io::prompt::PromptBuilder;
use crate::io::review::{PlanReviewer, PlanVerdict, UserInput};
use crate::io::sandbox::PathSandbox;
use crate::io::snapshot::{SnapshotStore, new_run_id};
use crate::io::transcript::{TaskTranscript, write_transcript};
use crate::react::{Reasoner, TaskExit};
use crate::tools::{ToolCategory, ToolRegistry};

pub const CANCELLED_RESPONSE: &str = "Operation cancelled by user.";

/// Final (or suspended) outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub response: String,
    pub stop: RunStop,
}

pub struct Orchestrator<'a, M: ModelClient, R: PlanReviewer> {
    config: EngineConfig,
    model: M,
    reviewer: R,
    registry: ToolRegistry,
    sandbox: PathSandbox,
    prompts: PromptBuilder,
    input: Option<&'a dyn UserInput>,
    cancel: CancellationToken,
    snapshots: Option<&'a SnapshotStore>,
    runs_dir: Option<PathBuf>,
}

impl<'a, M: ModelClient, R: PlanReviewer> Orchestrator<'a, M, R> {
    pub fn new(root: &Path, config: EngineConfig, model: M, reviewer: R) -> Result<Self> {
        config.validate()?;
        let sandbox = PathSandbox::new(root)?;
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        Ok(Self {
            config,
            model,
            reviewer,
            registry: ToolRegistry::builtin(),
            sandbox,
            prompts,
            input: None,
            cancel: CancellationToken::new(),
            snapshots: None,
            runs_dir: None,
        })
    }

    /// Answer `request_user_input` in place instead of suspending the run.
    pub fn with_input(mut self, input: &'a dyn UserInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Checkpoint into `store` and write transcripts below `runs_dir`.
    pub fn with_persistence(mut self, store: &'a SnapshotStore, runs_dir: &Path) -> Self {
        self.snapshots = Some(store);
        self.runs_dir = Some(runs_dir.to_path_buf());
        self
    }

    /// Fresh run state for `goal` with the configured limits and external paths.
    pub fn start(&self, goal: &str) -> RunState {
        let mut state = RunState::new(new_run_id(), goal.trim(), self.config.run_limits());
        for path in &self.config.allowed_external_paths {
            state.allow_external_path(path.clone());
        }
        info!(run_id = %state.run_id, goal = %state.goal, "starting run");
        state
    }

    /// Drive `state` until it stops.
    pub fn run(&self, state: &mut RunState) -> Result<RunReport> {
        let dispatcher = Dispatcher::new(&self.registry, &self.sandbox, self.config.tool_limits())
            .with_input(self.input)
            .with_cancellation(self.cancel.clone());
        let reasoner = Reasoner::new(&self.model, &self.prompts, &self.registry, &dispatcher);

        self.checkpoint(state)?;
        while !state.is_stopped() {
            if self.cancel.is_cancelled() && state.phase != RunPhase::Executing {
                info!(phase = ?state.phase, "cancellation observed between phases");
                state.finish(CANCELLED_RESPONSE, RunStop::Cancelled);
            } else {
                match state.phase {
                    RunPhase::Planning => self.plan(state)?,
                    RunPhase::Verifying => self.verify(state)?,
                    RunPhase::Executing => self.execute(&reasoner, state)?,
                    RunPhase::Replanning => self.replan(state)?,
                    RunPhase::Done => bail!("run {} is done but has no stop reason", state.run_id),
                }
            }
            self.checkpoint(state)?;
        }
        report(state)
    }

    /// Continue a persisted run, answering its pending question if there is one.
    pub fn resume(&self, state: &mut RunState, answer: Option<&str>) -> Result<RunReport> {
        if let Some(stop) = state.stop
            && stop.is_terminal()
        {
            bail!("run {} already stopped ({stop:?})", state.run_id);
        }
        if state.pending_input.is_some() {
            let answer = match answer {
                Some(answer) => answer.to_string(),
                None => self.ask_pending(state)?,
            };
            if let Some(pending) = state.pending_input.take() {
                record_user_answer(state, pending, &answer);
            }
            state.stop = None;
            state.response = None;
        }
        info!(run_id = %state.run_id, phase = ?state.phase, "resuming run");
        self.run(state)
    }

    fn ask_pending(&self, state: &RunState) -> Result<String> {
        let Some(pending) = state.pending_input.as_ref() else {
            bail!("run {} has no pending question", state.run_id);
        };
        let Some(input) = self.input else {
            bail!(
                "run {} is waiting for an answer to: {}",
                state.run_id,
                pending.question
            );
        };
        input.ask(&pending.question, &pending.suggested_responses)
    }

    fn plan(&self, state: &mut RunState) -> Result<()> {
        let tools = self.registry.specs_for(ToolCategory::Executor);
        let request = self.prompts.plan(state, &tools)?;
        let response = self
            .model
            .complete(&request)
            .and_then(|value| decode_response::<PlanResponse>(&value, Stage::Plan));
        match response.map(|plan| clean_tasks(plan.subtasks)) {
            Ok(tasks) if !tasks.is_empty() => {
                info!(tasks = tasks.len(), "plan generated");
                state.install_plan(tasks);
                state.outer_cycles = 0;
                state.plan_feedback = None;
                state.phase = RunPhase::Verifying;
            }
            Ok(_) => {
                warn!("planner returned no tasks");
                escalate(
                    state,
                    Phase::Planning,
                    ErrorKind::ParsingError,
                    "Failed to generate a plan: the planner returned no tasks.".to_string(),
                );
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "plan generation failed");
                escalate(
                    state,
                    Phase::Planning,
                    model_error_kind(&err),
                    format!("Failed to generate a plan: {err:#}"),
                );
            }
        }
        Ok(())
    }

    fn verify(&self, state: &mut RunState) -> Result<()> {
        if self.config.auto_approve {
            info!(tasks = state.task_queue.len(), "plan auto-approved");
            state.phase = RunPhase::Executing;
            return Ok(());
        }
        let verdict = self
            .reviewer
            .review(&state.task_queue)
            .context("review plan")?;
        match verdict {
            PlanVerdict::Approve => {
                info!("plan approved");
                state.phase = RunPhase::Executing;
            }
            PlanVerdict::Feedback(feedback) => {
                info!(feedback = %feedback, "plan rejected with feedback");
                if state.all_completed().next().is_none() {
                    state.original_plan.clear();
                }
                state.clear_queue();
                state.plan_feedback = Some(feedback);
                state.phase = RunPhase::Planning;
            }
            PlanVerdict::Cancel => {
                info!("plan cancelled by user");
                state.clear_queue();
                state.finish(CANCELLED_RESPONSE, RunStop::Cancelled);
            }
        }
        Ok(())
    }

    fn execute(&self, reasoner: &Reasoner<'_, M>, state: &mut RunState) -> Result<()> {
        if state.current_task().is_none() {
            state.phase = RunPhase::Replanning;
            return Ok(());
        }
        let exit = reasoner.run_task(state)?;
        self.write_transcript(state, &exit)?;

        match exit {
            TaskExit::Finished { summary } => advance(state, summary, TaskStatus::Completed),
            TaskExit::GuardExceeded { message } => {
                advance(state, message, TaskStatus::GuardExceeded);
            }
            TaskExit::ReplanRequested { reason } => {
                escalate(state, Phase::Reasoning, ErrorKind::ReplanRequested, reason);
            }
            TaskExit::RecursionLimit => {
                let message = format!(
                    "The plan used {} reasoning steps without finishing.",
                    state.limits.recursion_limit
                );
                escalate(state, Phase::Reasoning, ErrorKind::GraphRecursion, message);
            }
            TaskExit::Cancelled => {
                escalate(
                    state,
                    Phase::Reasoning,
                    ErrorKind::Cancelled,
                    CANCELLED_RESPONSE.to_string(),
                );
            }
            TaskExit::AwaitingInput => {
                let question = state
                    .pending_input
                    .as_ref()
                    .map(|pending| pending.question.clone())
                    .unwrap_or_default();
                escalate(state, Phase::Reasoning, ErrorKind::UserInputRequired, question);
            }
        }
        Ok(())
    }

    fn replan(&self, state: &mut RunState) -> Result<()> {
        let request = self.prompts.replan(state)?;
        let response = self
            .model
            .complete(&request)
            .and_then(|value| decode_response::<ReplanResponse>(&value, Stage::Replan));
        let replan = match response {
            Ok(replan) => replan,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "replanning failed");
                escalate(
                    state,
                    Phase::Replanning,
                    model_error_kind(&err),
                    format!("Failed to replan: {err:#}"),
                );
                return Ok(());
            }
        };

        let tasks = clean_tasks(replan.tasks);
        if tasks.is_empty() {
            info!("replanner reports the goal is achieved");
            let response = completion_summary(state, &replan.summary);
            state.finish(response, RunStop::Completed);
            return Ok(());
        }

        state.outer_cycles += 1;
        if state.outer_cycles > state.limits.max_outer_cycles {
            warn!(max = state.limits.max_outer_cycles, "outer cycle guard hit");
            let response = format!(
                "Stopped: outer loop exceeded {} replanning cycles.\n\n{}",
                state.limits.max_outer_cycles,
                completion_summary(state, "")
            );
            state.finish(response, RunStop::GuardExceeded);
            return Ok(());
        }
        info!(
            tasks = tasks.len(),
            outer_cycles = state.outer_cycles,
            "installing replanned tasks"
        );
        state.install_plan(tasks);
        state.phase = RunPhase::Verifying;
        Ok(())
    }

    fn checkpoint(&self, state: &RunState) -> Result<()> {
        match self.snapshots {
            Some(store) => store.save(state),
            None => Ok(()),
        }
    }

    fn write_transcript(&self, state: &RunState, exit: &TaskExit) -> Result<()> {
        let Some(runs_dir) = &self.runs_dir else {
            return Ok(());
        };
        let summary = match exit {
            TaskExit::Finished { summary } => summary.as_str(),
            TaskExit::GuardExceeded { message } => message.as_str(),
            TaskExit::ReplanRequested { reason } => reason.as_str(),
            TaskExit::AwaitingInput => state
                .pending_input
                .as_ref()
                .map_or("", |pending| pending.question.as_str()),
            TaskExit::RecursionLimit | TaskExit::Cancelled => "",
        };
        let transcript = TaskTranscript::new(
            &state.run_id,
            state.current_task().unwrap_or_default(),
            exit.label(),
            summary,
            state.inner_cycles,
            &state.scratchpad,
        );
        write_transcript(&runs_dir.join(&state.run_id), &transcript)?;
        Ok(())
    }
}

/// Route an error observed in `phase` according to its propagation policy.
fn escalate(state: &mut RunState, phase: Phase, kind: ErrorKind, message: String) {
    match kind.propagation(phase) {
        Propagation::RecoverLocally => {
            state.error_signal = Some(format_error(kind, &message, ""));
        }
        Propagation::Replan => {
            state.current_outcome = AgentOutcome::Empty;
            state.replan_reason = Some(format_error(kind, &message, ""));
            state.phase = RunPhase::Replanning;
        }
        Propagation::Fatal => state.finish(message, RunStop::ModelFailure),
        Propagation::Unwind if kind == ErrorKind::UserInputRequired => {
            info!(question = %message, "run suspended for user input");
            state.response = Some(message);
            state.stop = Some(RunStop::AwaitingInput);
        }
        Propagation::Unwind => {
            state.current_outcome = AgentOutcome::Empty;
            state.finish(message, RunStop::Cancelled);
        }
    }
}

/// Schema mismatches are parsing errors; anything else failed at the client.
fn model_error_kind(err: &anyhow::Error) -> ErrorKind {
    if err.downcast_ref::<DecodeError>().is_some() {
        ErrorKind::ParsingError
    } else {
        ErrorKind::LlmError
    }
}

fn advance(state: &mut RunState, summary: String, status: TaskStatus) {
    let exhausted = state.complete_current(summary, status);
    if exhausted {
        info!(completed = state.completed_tasks.len(), "task queue exhausted");
        state.phase = RunPhase::Replanning;
    } else {
        state.begin_task();
    }
}

fn clean_tasks(tasks: Vec<String>) -> Vec<String> {
    tasks
        .into_iter()
        .map(|task| task.trim().to_string())
        .filter(|task| !task.is_empty())
        .collect()
}

/// Final response listing every completed task of the run.
fn completion_summary(state: &RunState, summary: &str) -> String {
    let mut out = format!("Goal: {}\n", state.goal);
    let summary = summary.trim();
    if !summary.is_empty() {
        out.push_str(&format!("\n{summary}\n"));
    }
    out.push_str("\nCompleted tasks:\n");
    let mut any = false;
    for (i, done) in state.all_completed().enumerate() {
        any = true;
        let marker = match done.status {
            TaskStatus::Completed => "",
            TaskStatus::GuardExceeded => " (stopped by guard)",
        };
        out.push_str(&format!("{}. {}{marker}: {}\n", i + 1, done.task, done.summary));
    }
    if !any {
        out.push_str("(none)\n");
    }
    out
}

fn report(state: &RunState) -> Result<RunReport> {
    let Some(stop) = state.stop else {
        bail!("run {} ended without a stop reason", state.run_id);
    };
    Ok(RunReport {
        run_id: state.run_id.clone(),
        response: state.response.clone().unwrap_or_default(),
        stop,
    })
}
