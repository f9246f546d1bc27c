//! Layout of the `.taskloop/` directory and its scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{EngineConfig, write_config};

/// All canonical paths within `.taskloop/` for a project root.
#[derive(Debug, Clone)]
pub struct TaskloopPaths {
    pub root: PathBuf,
    pub taskloop_dir: PathBuf,
    pub state_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// Scratch files exchanged with the model command.
    pub model_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub lock_path: PathBuf,
}

impl TaskloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let taskloop_dir = root.join(".taskloop");
        let state_dir = taskloop_dir.join("state");
        Self {
            root: root.clone(),
            taskloop_dir: taskloop_dir.clone(),
            state_dir: state_dir.clone(),
            runs_dir: taskloop_dir.join("runs"),
            model_dir: taskloop_dir.join("model"),
            gitignore_path: taskloop_dir.join(".gitignore"),
            config_path: taskloop_dir.join("config.toml"),
            snapshot_path: state_dir.join("snapshot.json"),
            lock_path: state_dir.join("snapshot.lock"),
        }
    }

    /// Transcript directory for one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }
}

/// Options for `init_taskloop`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing taskloop-owned files.
    pub force: bool,
}

/// Create `.taskloop/` scaffolding in `root`.
///
/// Fails if `.taskloop/` already exists unless `options.force` is set.
pub fn init_taskloop(root: &Path, options: &InitOptions) -> Result<TaskloopPaths> {
    let paths = TaskloopPaths::new(root);
    if paths.taskloop_dir.exists() && !paths.taskloop_dir.is_dir() {
        return Err(anyhow!(
            "taskloop init: .taskloop exists but is not a directory"
        ));
    }
    if paths.taskloop_dir.exists() && !options.force {
        return Err(anyhow!(
            "taskloop init: .taskloop already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.taskloop_dir,
        &paths.state_dir,
        &paths.runs_dir,
        &paths.model_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    fs::write(&paths.gitignore_path, TASKLOOP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &EngineConfig::default())?;

    Ok(paths)
}

const TASKLOOP_GITIGNORE: &str = "state/\nruns/\nmodel/\n";
