//! Error types for depsync-engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures that are fatal to a single job.
///
/// A non-zero engine exit status is *not* one of these; it is reported through
/// [`crate::RunState::FailedNonfatal`] and the engine's own error events.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job file could not be serialized.
    #[error("failed to serialize job file: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// The engine executable is missing and could not be installed.
    #[error("update engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine process could not be launched.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran past its deadline and was terminated.
    #[error("update engine for job {job_id} exceeded {timeout:?} and was terminated")]
    TimedOut { job_id: String, timeout: Duration },

    /// The output file exists but does not have the documented structure.
    #[error("invalid engine output at {path}: {reason}")]
    InvalidOutput { path: PathBuf, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
