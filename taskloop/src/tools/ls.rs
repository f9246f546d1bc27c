//! `ls`: list a directory, optionally recursively.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use walkdir::WalkDir;

use super::{Tool, ToolCategory, ToolContext, ToolOutput, ToolSpec, optional_bool, optional_str};
use crate::core::types::ToolEffect;

pub struct LsTool;

const MAX_ENTRIES: usize = 500;
const SKIPPED_DIRS: [&str; 2] = [".git", ".taskloop"];

const SPEC: ToolSpec = ToolSpec {
    name: "ls",
    description: "List a directory (default: project root). Arguments: optional path, optional recursive (bool). Directories end with '/'.",
    categories: &[
        ToolCategory::Planner,
        ToolCategory::Executor,
        ToolCategory::Replanner,
    ],
    effect: ToolEffect::ReadOnly,
    path_params: &[],
};

impl Tool for LsTool {
    fn spec(&self) -> &ToolSpec {
        &SPEC
    }

    fn run(&self, input: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        let dir = match optional_str(input, "path")? {
            Some(path) => Path::new(path).to_path_buf(),
            None => ctx.root.to_path_buf(),
        };
        let recursive = optional_bool(input, "recursive")?.unwrap_or(false);

        if !dir.exists() {
            return Ok(ToolOutput::failed(format!(
                "Directory not found: {}",
                dir.display()
            )));
        }
        if !dir.is_dir() {
            return Ok(ToolOutput::failed(format!(
                "{} is a file; use read to view it",
                dir.display()
            )));
        }

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
            });

        let mut entries = Vec::new();
        let mut truncated = false;
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
            if entries.len() >= MAX_ENTRIES {
                truncated = true;
                break;
            }
            let relative = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if entry.file_type().is_dir() {
                entries.push(format!("{relative}/"));
            } else {
                entries.push(relative);
            }
        }

        Ok(ToolOutput::ok(json!({
            "path": dir.to_string_lossy(),
            "entries": entries,
            "truncated": truncated,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::EngineConfig;
    use std::fs;

    fn run(root: &Path, input: Value) -> ToolOutput {
        let ctx = ToolContext {
            root,
            limits: EngineConfig::default().tool_limits(),
            input: None,
        };
        LsTool
            .run(&input.as_object().cloned().expect("object"), &ctx)
            .expect("run")
    }

    fn fixture() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src/nested")).expect("mkdir");
        fs::create_dir_all(temp.path().join(".git")).expect("mkdir");
        fs::write(temp.path().join("b.txt"), "b").expect("write");
        fs::write(temp.path().join("src/main.rs"), "fn main() {}").expect("write");
        fs::write(temp.path().join("src/nested/x.rs"), "").expect("write");
        temp
    }

    #[test]
    fn lists_top_level_sorted_without_skipped_dirs() {
        let temp = fixture();
        let out = run(temp.path(), json!({}));
        assert_eq!(out.payload["entries"], json!(["b.txt", "src/"]));
    }

    #[test]
    fn recursive_listing_walks_subdirectories() {
        let temp = fixture();
        let out = run(
            temp.path(),
            json!({"path": temp.path().to_string_lossy(), "recursive": true}),
        );
        assert_eq!(
            out.payload["entries"],
            json!(["b.txt", "src/", "src/main.rs", "src/nested/", "src/nested/x.rs"])
        );
    }

    #[test]
    fn listing_a_file_fails_softly() {
        let temp = fixture();
        let out = run(
            temp.path(),
            json!({"path": temp.path().join("b.txt").to_string_lossy()}),
        );
        assert!(!out.success);
    }
}
