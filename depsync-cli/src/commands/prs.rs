//! `depsync prs`: list open pull requests that carry depsync properties.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use depsync_core::ExistingPullRequestRecord;
use depsync_host::PullRequestHost;

use super::RepositoryArgs;

/// Arguments for `depsync prs`.
#[derive(Args, Debug)]
pub struct PrsArgs {
    #[command(flatten)]
    pub repository: RepositoryArgs,

    /// Only list pull requests for this package manager (`npm_and_yarn`, ...).
    #[arg(long)]
    pub package_manager: Option<String>,

    /// Only list pull requests created by this user id.
    #[arg(long, env = "DEPSYNC_CREATOR")]
    pub creator: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullRequestRow {
    id: i64,
    package_manager: String,
    group: Option<String>,
    dependencies: Vec<String>,
}

#[derive(Tabled)]
struct PullRequestTableRow {
    #[tabled(rename = "#")]
    id: i64,
    #[tabled(rename = "package manager")]
    package_manager: String,
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "dependencies")]
    dependencies: String,
}

impl PrsArgs {
    pub fn run(self, json: bool) -> Result<()> {
        let client = self.repository.client()?;
        let records = client.active_pull_requests(self.creator.as_deref());
        let rows = rows(&records, self.package_manager.as_deref());

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize pull requests")?
            );
            return Ok(());
        }

        if rows.is_empty() {
            println!("No open depsync pull requests.");
            return Ok(());
        }
        println!(
            "{} open pull request(s) in {}/{}",
            rows.len().to_string().bold(),
            self.repository.project,
            self.repository.repository
        );
        let table_rows: Vec<PullRequestTableRow> = rows
            .into_iter()
            .map(|row| PullRequestTableRow {
                id: row.id,
                package_manager: row.package_manager,
                group: row.group.unwrap_or_else(|| "-".to_string()),
                dependencies: row.dependencies.join(", "),
            })
            .collect();
        let mut table = Table::new(table_rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn rows(records: &[ExistingPullRequestRecord], package_manager: Option<&str>) -> Vec<PullRequestRow> {
    records
        .iter()
        .filter_map(|record| {
            let pm = record.package_manager()?;
            if package_manager.is_some_and(|wanted| wanted != pm) {
                return None;
            }
            let identity = record.identity();
            Some(PullRequestRow {
                id: record.id,
                package_manager: pm.to_string(),
                group: identity
                    .as_ref()
                    .and_then(|i| i.group_name())
                    .map(str::to_string),
                dependencies: identity.map(|i| i.names()).unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use depsync_core::{DependencyIdentity, DependencyRef, PackageManager};

    #[test]
    fn rows_filter_by_package_manager() {
        let npm = ExistingPullRequestRecord::managed(
            1,
            &PackageManager::from_ecosystem("npm"),
            &DependencyIdentity::from_parts(Some("dev"), vec![DependencyRef::new("jest", "29.0.0")]),
        );
        let nuget = ExistingPullRequestRecord::managed(
            2,
            &PackageManager::from_ecosystem("nuget"),
            &DependencyIdentity::from_parts(None, vec![DependencyRef::new("Serilog", "3.0.0")]),
        );
        let unmanaged = ExistingPullRequestRecord {
            id: 3,
            properties: Vec::new(),
        };
        let records = [npm, nuget, unmanaged];

        assert_eq!(rows(&records, None).len(), 2);
        let only_npm = rows(&records, Some("npm_and_yarn"));
        assert_eq!(only_npm.len(), 1);
        assert_eq!(only_npm[0].group.as_deref(), Some("dev"));
        assert_eq!(only_npm[0].dependencies, vec!["jest".to_string()]);
    }
}
