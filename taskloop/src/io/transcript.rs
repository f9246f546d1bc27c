//! Per-task transcripts under `.taskloop/runs/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::ScratchEntry;

use super::write_atomic;

#[derive(Debug, Clone, Serialize)]
pub struct TaskTranscript<'a> {
    pub run_id: &'a str,
    pub task: &'a str,
    /// How the task left the inner loop, e.g. `finished` or `replan_requested`.
    pub exit: &'a str,
    pub summary: &'a str,
    pub cycles: u32,
    pub scratchpad: &'a [ScratchEntry],
    pub written_at: String,
}

impl<'a> TaskTranscript<'a> {
    pub fn new(
        run_id: &'a str,
        task: &'a str,
        exit: &'a str,
        summary: &'a str,
        cycles: u32,
        scratchpad: &'a [ScratchEntry],
    ) -> Self {
        Self {
            run_id,
            task,
            exit,
            summary,
            cycles,
            scratchpad,
            written_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Write the next numbered transcript (`001.json`, `002.json`, ...) into `run_dir`.
pub fn write_transcript(run_dir: &Path, transcript: &TaskTranscript<'_>) -> Result<PathBuf> {
    fs::create_dir_all(run_dir)
        .with_context(|| format!("create run dir {}", run_dir.display()))?;
    let index = list_transcripts(run_dir)?.len() + 1;
    let path = run_dir.join(format!("{index:03}.json"));
    let json = serde_json::to_string_pretty(transcript).context("serialize transcript")?;
    write_atomic(&path, &json)?;
    Ok(path)
}

/// Transcript files of a run, in write order.
pub fn list_transcripts(run_dir: &Path) -> Result<Vec<PathBuf>> {
    if !run_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(run_dir).with_context(|| format!("read run dir {}", run_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("read entry in {}", run_dir.display()))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
