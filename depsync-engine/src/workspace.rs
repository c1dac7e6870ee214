//! Per-job working directories under a shared root.
//!
//! ```text
//! <root>/
//!   <job_id>/
//!     job.yaml      engine input
//!     output.yaml   engine output
//! ```
//!
//! Job directories are created idempotently. The whole root is removed by
//! [`WorkspaceRoot::cleanup`], or automatically when a [`WorkspaceGuard`]
//! goes out of scope.

use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use depsync_core::JobId;

use crate::error::{io_err, EngineError};

pub const INPUT_FILE: &str = "job.yaml";
pub const OUTPUT_FILE: &str = "output.yaml";

/// Shared parent of every job directory in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

/// Paths owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    pub job_id: JobId,
    pub dir: PathBuf,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Wrap the root in a guard that removes it on drop.
    pub fn scoped(root: impl Into<PathBuf>) -> WorkspaceGuard {
        WorkspaceGuard {
            root: Self::new(root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// `<root>/<job_id>/`, created if absent.
    pub fn prepare(&self, job_id: &JobId) -> Result<JobWorkspace, EngineError> {
        let dir = self.root.join(&job_id.0);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        tracing::debug!(job = %job_id, dir = %dir.display(), "prepared job workspace");
        Ok(JobWorkspace {
            job_id: job_id.clone(),
            input_path: dir.join(INPUT_FILE),
            output_path: dir.join(OUTPUT_FILE),
            dir,
        })
    }

    /// Remove the entire root. A missing root is not an error.
    pub fn cleanup(&self) -> Result<(), EngineError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {
                tracing::debug!(root = %self.root.display(), "removed workspace root");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.root, err)),
        }
    }
}

/// Removes its [`WorkspaceRoot`] when dropped, whatever happened in between.
#[derive(Debug)]
pub struct WorkspaceGuard {
    root: WorkspaceRoot,
}

impl Deref for WorkspaceGuard {
    type Target = WorkspaceRoot;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if let Err(err) = self.root.cleanup() {
            tracing::warn!("workspace cleanup failed: {err}");
        }
    }
}
