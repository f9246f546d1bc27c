//! `write`: create or overwrite a file, creating parent directories.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};

use super::{Tool, ToolCategory, ToolContext, ToolOutput, ToolSpec, optional_str, required_str};
use crate::core::types::ToolEffect;

pub struct WriteTool;

const SPEC: ToolSpec = ToolSpec {
    name: "write",
    description: "Write a text file, replacing it if it exists. Arguments: path, and either content or content_ref (a token returned by read).",
    categories: &[ToolCategory::Executor],
    effect: ToolEffect::Write,
    path_params: &[],
};

impl Tool for WriteTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    fn run(&self, input: &Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let path = required_str(input, "path")?;
        let Some(content) = optional_str(input, "content")? else {
            bail!("missing required argument 'content' (or 'content_ref')");
        };

        let file = Path::new(path);
        if file.is_dir() {
            return Ok(ToolOutput::failed(format!("{path} is a directory")));
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let created = !file.exists();
        fs::write(file, content).with_context(|| format!("write {}", file.display()))?;

        Ok(ToolOutput::ok(json!({
            "path": path,
            "bytes_written": content.len(),
            "created": created,
        }))
        .with_file_content(path, content))
    }
}
