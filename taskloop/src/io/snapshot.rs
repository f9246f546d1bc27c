//! Persisted run snapshot (`.taskloop/state/snapshot.json`).
//!
//! One orchestrator at a time may own a checkpoint: [`SnapshotStore::open`]
//! takes an exclusive lock on `snapshot.lock` and holds it until dropped.
//! Writes go through temp file + rename so readers never see a torn file.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use fs2::FileExt;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::core::run_state::RunState;

use super::init::TaskloopPaths;

/// Exclusive handle on a run checkpoint.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    lock_path: PathBuf,
    _lock: File,
}

impl SnapshotStore {
    /// Acquire the checkpoint lock, failing fast if another run holds it.
    pub fn open(paths: &TaskloopPaths) -> Result<Self> {
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("create directory {}", paths.state_dir.display()))?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&paths.lock_path)
            .with_context(|| format!("open lock {}", paths.lock_path.display()))?;
        FileExt::try_lock_exclusive(&lock).map_err(|e| {
            anyhow!(
                "another taskloop run holds {} ({e})",
                paths.lock_path.display()
            )
        })?;
        debug!(path = %paths.snapshot_path.display(), "acquired snapshot lock");
        Ok(Self {
            path: paths.snapshot_path.clone(),
            lock_path: paths.lock_path.clone(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn load(&self) -> Result<Option<RunState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        load_snapshot(&self.path).map(Some)
    }

    pub fn save(&self, state: &RunState) -> Result<()> {
        write_snapshot(&self.path, state)
    }
}

/// Load a snapshot and check its invariants.
pub fn load_snapshot(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    let errors = validate_invariants(&state);
    if !errors.is_empty() {
        bail!(
            "snapshot {} violates invariants:\n- {}",
            path.display(),
            errors.join("\n- ")
        );
    }
    debug!(run_id = %state.run_id, phase = ?state.phase, "snapshot loaded");
    Ok(state)
}

/// Atomically write a snapshot (temp file + rename).
pub fn write_snapshot(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), run_id = %state.run_id, phase = ?state.phase, "writing snapshot");
    let mut buf = serde_json::to_string_pretty(state).context("serialize snapshot")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Identifier for a new run, e.g. `run-20250101_120000_123456`.
///
/// Microseconds keep runs started within the same second in separate
/// transcript directories.
pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"))
}
