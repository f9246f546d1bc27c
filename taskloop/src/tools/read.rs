//! `read`: return a file's contents, optionally a 1-based line range.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use super::{Tool, ToolCategory, ToolContext, ToolOutput, ToolSpec, optional_u64, required_str};
use crate::core::types::ToolEffect;

pub struct ReadTool;

const SPEC: ToolSpec = ToolSpec {
    name: "read",
    description: "Read a text file. Arguments: path, optional start_line and end_line (1-based, inclusive). The content is returned as a content_ref token that write accepts instead of content.",
    categories: &[
        ToolCategory::Planner,
        ToolCategory::Executor,
        ToolCategory::Replanner,
    ],
    effect: ToolEffect::ReadOnly,
    path_params: &[],
};

impl Tool for ReadTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    fn run(&self, input: &Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let path = required_str(input, "path")?;
        let start = optional_u64(input, "start_line")?;
        let end = optional_u64(input, "end_line")?;

        let file = Path::new(path);
        if !file.exists() {
            return Ok(ToolOutput::failed(format!("File not found: {path}")));
        }
        if file.is_dir() {
            return Ok(ToolOutput::failed(format!(
                "{path} is a directory; use ls to list it"
            )));
        }
        let contents =
            fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
        let total_lines = contents.lines().count() as u64;

        let first = start.unwrap_or(1).max(1);
        let last = end.unwrap_or(total_lines).min(total_lines);
        if start.is_some() || end.is_some() {
            if first > last && total_lines > 0 {
                return Ok(ToolOutput::failed(format!(
                    "Invalid line range {first}..{last} for {path} ({total_lines} lines)"
                )));
            }
            let slice: Vec<&str> = contents
                .lines()
                .skip((first - 1) as usize)
                .take((last + 1).saturating_sub(first) as usize)
                .collect();
            let mut body = slice.join("\n");
            if !body.is_empty() {
                body.push('\n');
            }
            return Ok(ToolOutput::ok(json!({
                "path": path,
                "start_line": first,
                "end_line": last,
                "total_lines": total_lines,
            }))
            .with_file_content(path, body));
        }

        Ok(ToolOutput::ok(json!({
            "path": path,
            "total_lines": total_lines,
        }))
        .with_file_content(path, contents))
    }
}
