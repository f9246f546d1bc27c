//! Model client boundary.
//!
//! The [`ModelClient`] trait decouples the loops from the model backend
//! (currently a `codex exec` style command). Responses are raw JSON; callers
//! decode them against a fixed schema with [`decode_response`]. Tests use
//! scripted clients that return queued values without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::DecodeError;

use super::config::ModelConfig;
use super::process::{CommandOutput, run_command_with_timeout};

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
pub const REPLAN_SCHEMA: &str = include_str!("../../schemas/replan.schema.json");
pub const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

/// Which loop state issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plan,
    Replan,
    Reason,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Replan => "replan",
            Stage::Reason => "reason",
        }
    }

    /// JSON Schema constraining responses for this stage.
    pub fn schema(self) -> &'static str {
        match self {
            Stage::Plan => PLAN_SCHEMA,
            Stage::Replan => REPLAN_SCHEMA,
            Stage::Reason => DECISION_SCHEMA,
        }
    }
}

/// One structured completion request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub stage: Stage,
    pub system: String,
    pub user: String,
}

impl ModelRequest {
    pub fn schema(&self) -> &'static str {
        self.stage.schema()
    }
}

/// Abstraction over model backends.
///
/// Retries and backoff belong to implementations; the loops treat any error
/// as a failure of the current state.
pub trait ModelClient {
    fn complete(&self, request: &ModelRequest) -> Result<Value>;
}

impl<T: ModelClient + ?Sized> ModelClient for &T {
    fn complete(&self, request: &ModelRequest) -> Result<Value> {
        (**self).complete(request)
    }
}

/// Client that spawns the configured command once per request.
///
/// The command receives `--output-schema <file> --output-last-message <file> -`
/// and the prompt on stdin, and must leave its final JSON message in the
/// output file.
#[derive(Debug, Clone)]
pub struct CommandModelClient {
    command: Vec<String>,
    workdir: PathBuf,
    scratch_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModelClient {
    pub fn new(config: &ModelConfig, workdir: &Path, scratch_dir: &Path) -> Self {
        Self {
            command: config.command.clone(),
            workdir: workdir.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl ModelClient for CommandModelClient {
    #[instrument(skip_all, fields(stage = request.stage.as_str(), timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest) -> Result<Value> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("model command is empty"))?;
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("create model dir {}", self.scratch_dir.display()))?;

        let stage = request.stage.as_str();
        let schema_path = self.scratch_dir.join(format!("{stage}.schema.json"));
        let output_path = self.scratch_dir.join(format!("{stage}.output.json"));
        let log_path = self.scratch_dir.join(format!("{stage}.log"));
        fs::write(&schema_path, request.schema())
            .with_context(|| format!("write schema {}", schema_path.display()))?;
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale output {}", output_path.display()))?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&self.workdir);

        let prompt = format!("{}\n\n{}", request.system.trim(), request.user.trim());
        info!(program = %program, prompt_bytes = prompt.len(), "requesting model completion");
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command {program}"))?;
        write_command_log(&log_path, &output, self.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?} (see {})",
                output.status.code(),
                log_path.display()
            ));
        }
        if !output_path.exists() {
            return Err(anyhow!("missing model output {}", output_path.display()));
        }
        let contents = fs::read_to_string(&output_path)
            .with_context(|| format!("read model output {}", output_path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("parse model output {}", output_path.display()))?;
        debug!("model completion received");
        Ok(value)
    }
}

/// Validate `value` against `schema` (Draft 2020-12) and deserialize it.
///
/// Failures carry a [`DecodeError`] so callers can tell malformed output
/// apart from transport failures.
pub fn decode_response<T: DeserializeOwned>(value: &Value, stage: Stage) -> Result<T> {
    let schema: Value = serde_json::from_str(stage.schema()).context("parse embedded schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(DecodeError {
            schema: stage.as_str(),
            messages,
        }
        .into());
    }
    serde_json::from_value(value.clone()).map_err(|err| {
        DecodeError {
            schema: stage.as_str(),
            messages: vec![err.to_string()],
        }
        .into()
    })
}

fn write_command_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_text());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_text());
    if output.timed_out {
        buf.push_str("\n[model command timed out]\n");
    }
    if buf.len() > output_limit {
        let cut = floor_char_boundary(&buf, output_limit);
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write model log {}", path.display()))
}

pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut cut = index;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Decision, PlanResponse, ReplanResponse};
    use serde_json::json;

    #[test]
    fn decodes_valid_plan() {
        let plan: PlanResponse =
            decode_response(&json!({"subtasks": ["create a.txt"]}), Stage::Plan).expect("decode");
        assert_eq!(plan.subtasks, vec!["create a.txt".to_string()]);
    }

    #[test]
    fn empty_plan_is_a_decode_error() {
        let err = decode_response::<PlanResponse>(&json!({"subtasks": []}), Stage::Plan)
            .unwrap_err();
        let decode = err.downcast_ref::<DecodeError>().expect("decode error");
        assert_eq!(decode.schema, "plan");
    }

    #[test]
    fn empty_replan_means_done() {
        let replan: ReplanResponse =
            decode_response(&json!({"tasks": [], "summary": "done"}), Stage::Replan)
                .expect("decode");
        assert!(replan.tasks.is_empty());
    }

    #[test]
    fn decision_requires_every_field() {
        let err = decode_response::<Decision>(&json!({"action": "ls"}), Stage::Reason).unwrap_err();
        assert!(err.downcast_ref::<DecodeError>().is_some());

        let decision: Decision = decode_response(
            &json!({
                "thought": null,
                "action": "ls",
                "action_input": {"path": "."},
                "final_answer": null,
                "replan_reason": null
            }),
            Stage::Reason,
        )
        .expect("decode");
        assert_eq!(decision.action.as_deref(), Some("ls"));
    }

    #[test]
    fn char_boundary_never_splits_utf8() {
        let text = "héllo";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 99), text.len());
    }

    #[cfg(unix)]
    #[test]
    fn command_client_reads_last_message_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("fake-model.sh");
        // Arguments: --output-schema <schema> --output-last-message <out> -
        fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf '{\"subtasks\":[\"x\"]}' > \"$4\"\n",
        )
        .expect("write script");
        let config = ModelConfig {
            command: vec!["sh".to_string(), script.to_string_lossy().to_string()],
            ..ModelConfig::default()
        };
        let client = CommandModelClient::new(&config, temp.path(), &temp.path().join("model"));
        let value = client
            .complete(&ModelRequest {
                stage: Stage::Plan,
                system: "system".to_string(),
                user: "user".to_string(),
            })
            .expect("complete");
        assert_eq!(value, json!({"subtasks": ["x"]}));
        assert!(temp.path().join("model/plan.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn command_client_reports_failure_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ModelConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            ..ModelConfig::default()
        };
        let client = CommandModelClient::new(&config, temp.path(), &temp.path().join("model"));
        let err = client
            .complete(&ModelRequest {
                stage: Stage::Reason,
                system: String::new(),
                user: String::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("failed with status"));
    }
}
