//! depsync: dependency update pull requests for Azure DevOps repositories.
//!
//! # Usage
//!
//! ```text
//! depsync run --organization-url <url> --project <p> --repository <r> [--config <file>] [--dry-run]
//! depsync prs --organization-url <url> --project <p> --repository <r> [--package-manager <pm>]
//! depsync dependencies --snapshot-dir <dir> --ecosystem <e> [--directory <d>]
//! depsync branch-name --ecosystem <e> [--directory <d>] [--group <g>] <name@version>...
//! ```
//!
//! Logs go to stderr (`RUST_LOG` filters, default `info`); results go to stdout.

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    branch_name::BranchNameArgs, dependencies::DependenciesArgs, prs::PrsArgs, run::RunArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "depsync",
    version,
    about = "Reconcile dependency update pull requests on Azure DevOps",
    long_about = None,
)]
struct Cli {
    /// Machine-readable output: JSON log lines and JSON results.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every configured update and reconcile its pull requests.
    Run(RunArgs),

    /// List open pull requests managed by depsync.
    Prs(PrsArgs),

    /// Show the dependency list recorded by the last run.
    Dependencies(DependenciesArgs),

    /// Print the branch name an update would use.
    BranchName(BranchNameArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json);
    match cli.command {
        Commands::Run(args) => args.run(cli.json),
        Commands::Prs(args) => args.run(cli.json).map(|()| ExitCode::SUCCESS),
        Commands::Dependencies(args) => args.run(cli.json).map(|()| ExitCode::SUCCESS),
        Commands::BranchName(args) => args.run().map(|()| ExitCode::SUCCESS),
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
