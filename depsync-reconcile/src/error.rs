//! Error types for depsync-reconcile.

use std::path::PathBuf;

use thiserror::Error;

use depsync_core::{ConfigError, JobError};
use depsync_engine::EngineError;

/// Failures that stop a job before its events can be reconciled.
///
/// Per-event failures are not errors; they are recorded as
/// [`crate::EventOutcome::Failed`] and processing continues.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (dependency snapshots).
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`ReconcileError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReconcileError {
    ReconcileError::Io {
        path: path.into(),
        source,
    }
}
