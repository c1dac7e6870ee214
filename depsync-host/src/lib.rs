//! # depsync-host
//!
//! Hosting-platform client for pull-request reconciliation.
//!
//! [`PullRequestHost`] is the seam the reconciler talks to;
//! [`AzureDevOpsClient`] implements it over a [`RetryingSender`], which in
//! turn wraps any [`Transport`].

pub mod azure;
pub mod error;
pub mod host;
pub mod models;
pub mod retry;
pub mod transport;

pub use azure::AzureDevOpsClient;
pub use error::HostError;
pub use host::{
    AutoComplete, CommitAuthor, FileChange, FileChangeKind, MergeStrategy, NewPullRequest,
    PullRequestAbandon, PullRequestDetail, PullRequestHost, PullRequestRebase,
};
pub use retry::{RetryPolicy, RetryingSender};
pub use transport::{HttpRequest, HttpResponse, Method, Transport, UreqTransport};
