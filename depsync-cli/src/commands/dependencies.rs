//! `depsync dependencies`: show the dependency list stored by `depsync run --snapshot-dir`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use depsync_core::PackageManager;
use depsync_reconcile::{SnapshotFile, SnapshotStore};

/// Arguments for `depsync dependencies`.
#[derive(Args, Debug)]
pub struct DependenciesArgs {
    /// Directory passed to `depsync run --snapshot-dir`.
    #[arg(long, env = "DEPSYNC_SNAPSHOT_DIR")]
    pub snapshot_dir: PathBuf,

    /// Ecosystem as written in the configuration (`npm`, `nuget`, ...).
    #[arg(long)]
    pub ecosystem: String,

    #[arg(long)]
    pub directory: Option<String>,
}

#[derive(Tabled)]
struct DependencyRow {
    #[tabled(rename = "dependency")]
    name: String,
    #[tabled(rename = "version")]
    version: String,
}

impl DependenciesArgs {
    pub fn run(self, json: bool) -> Result<()> {
        let package_manager = PackageManager::from_ecosystem(&self.ecosystem);
        let store = SnapshotStore::new(&self.snapshot_dir);
        let Some(snapshot) = store
            .load(&package_manager.0, self.directory.as_deref())
            .context("failed to read dependency snapshot")?
        else {
            bail!(
                "no dependency list recorded for {package_manager} in {}",
                store.path_for(&package_manager.0, self.directory.as_deref()).display()
            );
        };

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to serialize snapshot")?
            );
        } else {
            print_table(&snapshot);
        }
        Ok(())
    }
}

fn print_table(snapshot: &SnapshotFile) {
    println!(
        "{} dependencies for {} ({}), recorded {}",
        snapshot.dependencies.len().to_string().bold(),
        snapshot.package_manager,
        snapshot.directory.as_deref().unwrap_or("/"),
        snapshot.recorded_at.format("%Y-%m-%d %H:%M UTC"),
    );
    let rows: Vec<DependencyRow> = snapshot
        .dependencies
        .iter()
        .map(|dep| DependencyRow {
            name: dep.name.clone(),
            version: dep.version.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
