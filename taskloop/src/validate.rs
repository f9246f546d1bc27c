//! Validation of the `.taskloop/` layout, config and persisted snapshot.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::types::{RunPhase, RunStop};
use crate::io::config::load_config;
use crate::io::init::TaskloopPaths;
use crate::io::snapshot::load_snapshot;

/// State of the persisted run, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValidation {
    /// No run has been checkpointed yet.
    NoRun,
    Ok {
        run_id: String,
        phase: RunPhase,
        stop: Option<RunStop>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub snapshot: SnapshotValidation,
}

/// Validate `.taskloop/` layout, config and snapshot invariants.
pub fn validate_taskloop(root: &Path) -> Result<ValidateOutcome> {
    let paths = TaskloopPaths::new(root);

    ensure_dir(&paths.taskloop_dir)?;
    ensure_dir(&paths.state_dir)?;
    ensure_file(&paths.gitignore_path)?;
    ensure_gitignore(&paths.gitignore_path)?;

    let config = load_config(&paths.config_path).context("load config.toml")?;
    config.validate().context("validate config.toml")?;

    if !paths.snapshot_path.exists() {
        return Ok(ValidateOutcome {
            snapshot: SnapshotValidation::NoRun,
        });
    }
    let state = load_snapshot(&paths.snapshot_path).context("load snapshot.json")?;
    Ok(ValidateOutcome {
        snapshot: SnapshotValidation::Ok {
            run_id: state.run_id,
            phase: state.phase,
            stop: state.stop,
        },
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

fn ensure_gitignore(path: &Path) -> Result<()> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for required in ["state/", "runs/", "model/"] {
        if !contents.lines().any(|line| line.trim() == required) {
            return Err(anyhow!("missing '{}' in {}", required, path.display()));
        }
    }
    Ok(())
}
