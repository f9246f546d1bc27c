//! `bash`: run a shell command in the project root.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::info;

use super::{Tool, ToolCategory, ToolContext, ToolOutput, ToolSpec, optional_u64, required_str};
use crate::core::types::ToolEffect;
use crate::io::process::run_command_with_timeout;

pub struct BashTool;

const SPEC: ToolSpec = ToolSpec {
    name: "bash",
    description: "Run a shell command with `sh -c` in the project root. Arguments: command, optional timeout_secs. Returns exit_code, stdout and stderr.",
    categories: &[ToolCategory::Executor],
    effect: ToolEffect::Command,
    path_params: &[],
};

impl Tool for BashTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    fn run(&self, input: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let command = required_str(input, "command")?;
        let timeout = optional_u64(input, "timeout_secs")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .map_or(ctx.limits.bash_timeout, |requested| {
                requested.min(ctx.limits.bash_timeout)
            });

        info!(command, timeout_secs = timeout.as_secs(), "running shell command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(ctx.root);
        let output = run_command_with_timeout(cmd, None, timeout, ctx.limits.output_limit_bytes)
            .context("run shell command")?;

        let payload = json!({
            "exit_code": output.status.code(),
            "stdout": output.stdout_text(),
            "stderr": output.stderr_text(),
            "timed_out": output.timed_out,
        });
        if output.succeeded() {
            Ok(ToolOutput::ok(payload))
        } else {
            Ok(ToolOutput {
                success: false,
                ..ToolOutput::ok(payload)
            })
        }
    }
}
