//! # depsync-engine
//!
//! Job workspaces, update engine invocation, and typed engine output.
//!
//! Prepare a [`JobWorkspace`] under a [`WorkspaceRoot`], hand it to
//! [`EngineInvoker::run`] with a built job file, and consume the returned
//! [`OutputEvent`]s.

pub mod error;
pub mod invoker;
pub mod locate;
pub mod output;
pub mod workspace;

pub use error::EngineError;
pub use invoker::{EngineInvoker, DEFAULT_JOB_TIMEOUT, JobRunner, RunOptions, RunReport, RunState};
pub use locate::ensure_engine_available;
pub use output::{read_outputs, OutputEvent};
pub use workspace::{JobWorkspace, WorkspaceGuard, WorkspaceRoot};
