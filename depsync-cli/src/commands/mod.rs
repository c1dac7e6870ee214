pub mod branch_name;
pub mod dependencies;
pub mod prs;
pub mod run;

use anyhow::{ensure, Result};
use clap::Args;

use depsync_core::RepositorySource;
use depsync_host::{azure::DEFAULT_TIMEOUT, AzureDevOpsClient};

/// Where the repository lives and how to reach it.
#[derive(Args, Debug, Clone)]
pub struct RepositoryArgs {
    /// Organization URL, e.g. `https://dev.azure.com/contoso/`.
    #[arg(long, env = "DEPSYNC_ORGANIZATION_URL")]
    pub organization_url: String,

    #[arg(long, env = "DEPSYNC_PROJECT")]
    pub project: String,

    #[arg(long, env = "DEPSYNC_REPOSITORY")]
    pub repository: String,

    /// Personal access token with code read/write and pull request rights.
    #[arg(long, env = "DEPSYNC_TOKEN", hide_env_values = true)]
    pub token: String,
}

impl RepositoryArgs {
    pub fn source(&self) -> RepositorySource {
        RepositorySource::azure_devops(&self.organization_url, &self.project, &self.repository)
    }

    pub fn client(&self) -> Result<AzureDevOpsClient> {
        self.client_with_token(&self.token)
    }

    /// A client for the same repository acting as another identity.
    pub fn client_with_token(&self, token: &str) -> Result<AzureDevOpsClient> {
        ensure!(!token.trim().is_empty(), "access token must not be empty");
        Ok(AzureDevOpsClient::connect(
            &self.organization_url,
            &self.project,
            &self.repository,
            token,
            DEFAULT_TIMEOUT,
        ))
    }
}
