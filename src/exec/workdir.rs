// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Scoped working directories for action execution.
//!
//! Each action runs in its own temporary directory with its inputs staged
//! in. The directory is owned by a guard and removed on drop, so it is
//! released on every exit path — success, failure, panic unwind, or
//! cancellation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// RAII working directory for one action attempt.
#[derive(Debug)]
pub struct ScopedWorkdir {
    dir: TempDir,
}

impl ScopedWorkdir {
    /// Create a fresh directory under `scratch_root` (created if missing).
    pub fn create(scratch_root: &Path) -> io::Result<Self> {
        fs::create_dir_all(scratch_root)?;
        let dir = TempDir::with_prefix_in("action-", scratch_root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stage workspace files into the directory, preserving their relative
    /// paths. Hard links are preferred; a link failure (cross-device
    /// scratch, for instance) falls back to a copy.
    pub fn stage_inputs(&self, workspace_root: &Path, inputs: &[PathBuf]) -> io::Result<()> {
        for input in inputs {
            let source = workspace_root.join(input);
            let dest = self.dir.path().join(input);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::hard_link(&source, &dest).is_err() {
                fs::copy(&source, &dest)?;
            }
        }
        Ok(())
    }
}
