//! Path sandbox: resolve tool path arguments against the project root.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::errors::SandboxViolation;

/// Canonical project root plus the policy for external paths.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox rooted at the canonical form of `root`.
    pub fn new(root: &Path) -> Result<Self> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("canonicalize project root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` to an absolute path the tool may touch.
    ///
    /// Descendants of the root are accepted. Anything else must match an
    /// entry of `allowed` exactly, by literal string or after both sides are
    /// canonicalized.
    pub fn resolve(
        &self,
        raw: &str,
        allowed: &BTreeSet<String>,
    ) -> Result<PathBuf, SandboxViolation> {
        let violation = |reason: &str| SandboxViolation {
            path: raw.to_string(),
            boundary: self.root.clone(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(violation("empty path"));
        }
        let expanded = expand_home(raw).ok_or_else(|| violation("home directory unknown"))?;
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        };
        let resolved = canonicalize_lenient(&joined).map_err(|reason| violation(&reason))?;

        if resolved.starts_with(&self.root) {
            return Ok(resolved);
        }

        for entry in allowed {
            if entry == raw {
                debug!(path = raw, "external path allowed by literal match");
                return Ok(resolved);
            }
            let Some(candidate) = expand_home(entry) else {
                continue;
            };
            if let Ok(canonical) = canonicalize_lenient(&candidate)
                && canonical == resolved
            {
                debug!(path = raw, entry = %entry, "external path allowed");
                return Ok(resolved);
            }
        }

        Err(violation("not under the project root or the allowed external paths"))
    }
}

fn expand_home(raw: &str) -> Option<PathBuf> {
    if raw == "~" {
        return dirs::home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return dirs::home_dir().map(|home| home.join(rest));
    }
    Some(PathBuf::from(raw))
}

/// Canonicalize a path that may not exist yet.
///
/// Components are resolved left to right. Each existing prefix is
/// canonicalized (following symlinks) before the next component is applied,
/// so `..` steps out of a symlink's target rather than out of the link's
/// directory. Missing components are appended as written. A component that
/// exists but cannot be resolved, such as a broken symlink, is an error.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, String> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                resolved = match fs::canonicalize(&candidate) {
                    Ok(canonical) => canonical,
                    Err(err) if fs::symlink_metadata(&candidate).is_ok() => {
                        return Err(format!("cannot resolve {}: {err}", candidate.display()));
                    }
                    Err(_) => candidate,
                };
            }
        }
    }
    if resolved.as_os_str().is_empty() {
        return Err(format!("cannot resolve {}", path.display()));
    }
    Ok(resolved)
}
