//! # depsync-reconcile
//!
//! Turns update engine output into pull-request operations.
//!
//! [`Reconciler`] handles the events of one job against a
//! [`depsync_host::PullRequestHost`]; [`Pipeline`] builds and runs every job
//! of a configuration file and reconciles each in turn.

pub mod error;
pub mod messages;
pub mod outcome;
pub mod pipeline;
pub mod reconciler;
pub mod snapshot;

pub use error::ReconcileError;
pub use outcome::{EventOutcome, EventRecord, ReconcileReport, RunVerdict};
pub use pipeline::{JobSummary, Pipeline, PipelineSettings, RunSummary};
pub use reconciler::{PullRequestOptions, Reconciler};
pub use snapshot::{SnapshotFile, SnapshotStore};
