//! depsync core library: domain types, update configuration, branch naming,
//! and job definitions.
//!
//! - [`types`]: newtypes, dependency identities, existing PR records
//! - [`config`]: `dependabot.yml`-shaped update configuration
//! - [`branch`]: deterministic branch names
//! - [`job`]: [`JobBuilder`] and the engine input document
//! - [`error`]: [`ConfigError`], [`JobError`]

pub mod branch;
pub mod config;
pub mod error;
pub mod job;
pub mod types;

pub use branch::branch_name;
pub use config::{UpdateConfig, UpdateConfigFile, VersioningStrategy};
pub use error::{ConfigError, JobError};
pub use job::{
    Credential, CredentialSources, JobBuilder, JobDefinition, JobFile, JobRequest,
    RepositorySource, SecurityAdvisory, TargetSelector,
};
pub use types::{
    DependencyIdentity, DependencyRef, ExistingPullRequestRecord, JobId, PackageManager,
    PullRequestProperty,
};
