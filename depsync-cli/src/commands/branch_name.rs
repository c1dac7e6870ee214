//! `depsync branch-name`: preview the branch an update would be pushed to.

use anyhow::{bail, Result};
use clap::Args;

use depsync_core::{branch_name, DependencyRef};

/// Arguments for `depsync branch-name`.
#[derive(Args, Debug)]
pub struct BranchNameArgs {
    /// Ecosystem as written in the configuration (`npm`, `nuget`, ...).
    #[arg(long)]
    pub ecosystem: String,

    #[arg(long)]
    pub target_branch: Option<String>,

    #[arg(long)]
    pub directory: Option<String>,

    /// Dependency group name, for grouped updates.
    #[arg(long)]
    pub group: Option<String>,

    #[arg(long, default_value = "/")]
    pub separator: String,

    /// The single dependency is being removed.
    #[arg(long)]
    pub removed: bool,

    /// Dependencies as `name@version`.
    #[arg(required = true, value_name = "NAME@VERSION")]
    pub dependencies: Vec<String>,
}

impl BranchNameArgs {
    pub fn run(self) -> Result<()> {
        let mut dependencies = self
            .dependencies
            .iter()
            .map(|raw| parse_dependency(raw))
            .collect::<Result<Vec<_>>>()?;
        if self.removed {
            if dependencies.len() != 1 {
                bail!("--removed applies to exactly one dependency");
            }
            dependencies[0].removed = true;
        }

        println!(
            "{}",
            branch_name(
                &self.ecosystem,
                self.target_branch.as_deref(),
                self.directory.as_deref(),
                self.group.as_deref(),
                &dependencies,
                &self.separator,
            )
        );
        Ok(())
    }
}

/// `name@version`; a leading `@` belongs to the name (`@types/node@20.1.0`).
fn parse_dependency(raw: &str) -> Result<DependencyRef> {
    match raw.rfind('@') {
        Some(at) if at > 0 && at + 1 < raw.len() => {
            Ok(DependencyRef::new(&raw[..at], &raw[at + 1..]))
        }
        _ => bail!("expected NAME@VERSION, got '{raw}'"),
    }
}
