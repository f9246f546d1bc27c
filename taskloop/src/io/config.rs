//! Engine configuration stored under `.taskloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::run_state::RunLimits;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Reasoning turns allowed per task before the inner guard fires.
    pub max_inner_cycles: u32,

    /// Replanning rounds allowed before the outer guard fires.
    pub max_outer_cycles: u32,

    /// Reasoning turns allowed per installed plan.
    pub recursion_limit: u32,

    pub repetition_threshold: usize,
    pub repetition_window: usize,
    pub max_subtasks_per_task: usize,

    /// Maximum bytes for a rendered prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    /// Skip human verification of plans.
    pub auto_approve: bool,

    /// Paths outside the project root that tools may touch.
    pub allowed_external_paths: Vec<String>,

    pub model: ModelConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that answers model requests (e.g. `["codex","exec"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate model command logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub bash_timeout_secs: u64,
    /// Truncate tool stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Limits handed to tools at invocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLimits {
    pub bash_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash_timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = RunLimits::default();
        Self {
            max_inner_cycles: limits.max_inner_cycles,
            max_outer_cycles: limits.max_outer_cycles,
            recursion_limit: limits.recursion_limit,
            repetition_threshold: limits.repetition_threshold,
            repetition_window: limits.repetition_window,
            max_subtasks_per_task: limits.max_subtasks_per_task,
            prompt_budget_bytes: 40_000,
            auto_approve: false,
            allowed_external_paths: Vec::new(),
            model: ModelConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_inner_cycles", self.max_inner_cycles as u64),
            ("max_outer_cycles", self.max_outer_cycles as u64),
            ("recursion_limit", self.recursion_limit as u64),
            ("repetition_threshold", self.repetition_threshold as u64),
            ("repetition_window", self.repetition_window as u64),
            ("max_subtasks_per_task", self.max_subtasks_per_task as u64),
            ("prompt_budget_bytes", self.prompt_budget_bytes as u64),
            ("model.timeout_secs", self.model.timeout_secs),
            ("model.output_limit_bytes", self.model.output_limit_bytes as u64),
            ("tools.bash_timeout_secs", self.tools.bash_timeout_secs),
            ("tools.output_limit_bytes", self.tools.output_limit_bytes as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            max_inner_cycles: self.max_inner_cycles,
            max_outer_cycles: self.max_outer_cycles,
            recursion_limit: self.recursion_limit,
            repetition_threshold: self.repetition_threshold,
            repetition_window: self.repetition_window,
            max_subtasks_per_task: self.max_subtasks_per_task,
        }
    }

    pub fn tool_limits(&self) -> ToolLimits {
        ToolLimits {
            bash_timeout: Duration::from_secs(self.tools.bash_timeout_secs),
            output_limit_bytes: self.tools.output_limit_bytes,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.max_inner_cycles, 20);
        assert_eq!(cfg.repetition_threshold, 3);
        assert_eq!(cfg.repetition_window, 5);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = EngineConfig {
            auto_approve: true,
            allowed_external_paths: vec!["/tmp/shared".to_string()],
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_inner_cycles = 7\n[tools]\nbash_timeout_secs = 9\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_inner_cycles, 7);
        assert_eq!(cfg.tools.bash_timeout_secs, 9);
        assert_eq!(cfg.tools.output_limit_bytes, 100_000);
        assert_eq!(cfg.model, ModelConfig::default());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "repetition_window = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("repetition_window must be > 0"));
    }

    #[test]
    fn empty_model_command_is_rejected() {
        let cfg = EngineConfig {
            model: ModelConfig {
                command: Vec::new(),
                ..ModelConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
