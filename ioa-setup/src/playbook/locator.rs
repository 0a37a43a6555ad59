// SPDX-License-Identifier: AGPL-3.0-or-later
//! Playbook discovery
//!
//! Candidates are checked in order, so a development checkout next to the
//! working directory shadows a system-wide installation.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Finds the provisioning playbook among a fixed list of candidates
#[derive(Debug, Clone)]
pub struct PlaybookLocator {
    candidates: Vec<PathBuf>,
    search_root: PathBuf,
}

impl PlaybookLocator {
    /// Relative candidates are resolved against `search_root`, which should
    /// be absolute (normally the current working directory)
    pub fn new(candidates: Vec<PathBuf>, search_root: impl Into<PathBuf>) -> Self {
        Self {
            candidates,
            search_root: search_root.into(),
        }
    }

    /// Resolve relative candidates against the process working directory
    pub fn from_current_dir(candidates: Vec<PathBuf>) -> std::io::Result<Self> {
        Ok(Self::new(candidates, std::env::current_dir()?))
    }

    /// Candidates as they will be checked, in precedence order
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.candidates
            .iter()
            .map(|candidate| self.absolute(candidate))
            .collect()
    }

    /// Canonical path of the first candidate that exists
    pub fn locate(&self) -> Option<PathBuf> {
        let hit = self.search_paths().into_iter().find(|path| {
            let found = path.exists();
            debug!(path = %path.display(), found, "Checked playbook candidate");
            found
        })?;
        Some(std::fs::canonicalize(&hit).unwrap_or(hit))
    }

    fn absolute(&self, candidate: &Path) -> PathBuf {
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.search_root.join(candidate)
        }
    }
}
