//! `depsync run`: run every configured update and reconcile its pull requests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use depsync_core::{config, job::parse_experiments, CredentialSources, UpdateConfigFile};
use depsync_engine::{ensure_engine_available, EngineInvoker, RunOptions, WorkspaceRoot};
use depsync_host::{AutoComplete, CommitAuthor, MergeStrategy};
use depsync_reconcile::{
    reconciler::{DEFAULT_AUTHOR_EMAIL, DEFAULT_AUTHOR_NAME},
    EventOutcome, JobSummary, Pipeline, PipelineSettings, PullRequestOptions, RunSummary, RunVerdict,
    SnapshotStore,
};

use super::RepositoryArgs;

/// Arguments for `depsync run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub repository: RepositoryArgs,

    /// Update configuration file.
    #[arg(long, env = "DEPSYNC_CONFIG", default_value = ".github/dependabot.yml")]
    pub config: PathBuf,

    /// Token of a second identity used to approve created pull requests.
    #[arg(long, env = "DEPSYNC_APPROVER_TOKEN", hide_env_values = true)]
    pub approver_token: Option<String>,

    /// github.com token, to avoid rate limits when fetching release notes.
    #[arg(long, env = "DEPSYNC_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Root for job workspaces [default: <cache dir>/depsync/jobs].
    #[arg(long, env = "DEPSYNC_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Keep job workspaces after the run.
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Store reported dependency lists in this directory.
    #[arg(long, env = "DEPSYNC_SNAPSHOT_DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// JSON file mapping ecosystems to vulnerable dependency names.
    #[arg(long, env = "DEPSYNC_VULNERABILITIES")]
    pub vulnerabilities: Option<PathBuf>,

    /// Engine experiments, `a,b=false,c=value`.
    #[arg(long, env = "DEPSYNC_EXPERIMENTS", default_value = "")]
    pub experiments: String,

    /// Update engine executable [default: `dependabot` on PATH].
    #[arg(long, env = "DEPSYNC_ENGINE")]
    pub engine: Option<PathBuf>,

    /// Kill a job after this many minutes.
    #[arg(long, env = "DEPSYNC_JOB_TIMEOUT_MINUTES", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub job_timeout_minutes: u64,

    #[arg(long, env = "DEPSYNC_UPDATER_IMAGE")]
    pub updater_image: Option<String>,

    #[arg(long, env = "DEPSYNC_PROXY_IMAGE")]
    pub proxy_image: Option<String>,

    /// Report what would change without touching pull requests.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub skip_pull_requests: bool,

    #[arg(long)]
    pub skip_pull_request_updates: bool,

    #[arg(long)]
    pub skip_pull_request_close: bool,

    /// Abandon pull requests without explaining why.
    #[arg(long)]
    pub no_close_comments: bool,

    #[arg(long, env = "DEPSYNC_AUTHOR_NAME", default_value = DEFAULT_AUTHOR_NAME)]
    pub author_name: String,

    #[arg(long, env = "DEPSYNC_AUTHOR_EMAIL", default_value = DEFAULT_AUTHOR_EMAIL)]
    pub author_email: String,

    /// Set auto-complete on created pull requests.
    #[arg(long)]
    pub auto_complete: bool,

    /// noFastForward, squash, rebase or rebaseMerge.
    #[arg(long, default_value = "squash", value_parser = parse_merge_strategy)]
    pub merge_strategy: MergeStrategy,

    /// Policy configuration ids auto-complete may bypass.
    #[arg(long, value_delimiter = ',')]
    pub auto_complete_ignore_config_ids: Vec<i64>,

    /// Approve created and updated pull requests (needs --approver-token).
    #[arg(long, requires = "approver_token")]
    pub auto_approve: bool,

    /// Work item to link to created pull requests.
    #[arg(long, env = "DEPSYNC_WORK_ITEM")]
    pub work_item: Option<String>,

    /// Only pull requests created by this user id count as existing.
    #[arg(long, env = "DEPSYNC_CREATOR")]
    pub creator: Option<String>,

    /// Ask the engine for debug output.
    #[arg(long)]
    pub debug: bool,
}

fn parse_merge_strategy(raw: &str) -> Result<MergeStrategy, String> {
    MergeStrategy::parse(raw).ok_or_else(|| {
        format!("unknown merge strategy '{raw}'; expected: noFastForward, squash, rebase, rebaseMerge")
    })
}

impl RunArgs {
    pub fn run(self, json: bool) -> Result<ExitCode> {
        let file = load_config(&self.config)?;
        let vulnerable = match &self.vulnerabilities {
            Some(path) => load_vulnerabilities(path)?,
            None => BTreeMap::new(),
        };
        let engine = match &self.engine {
            Some(path) => path.clone(),
            None => ensure_engine_available().context("update engine is not available")?,
        };

        let host = self.repository.client()?;
        let approver = self
            .approver_token
            .as_deref()
            .map(|token| self.repository.client_with_token(token))
            .transpose()?;

        let root = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .context("could not determine cache directory; pass --work-dir")?
                .join("depsync")
                .join("jobs"),
        };
        let _cleanup = (!self.keep_workspaces).then(|| WorkspaceRoot::scoped(root.clone()));
        let workspaces = WorkspaceRoot::new(root);
        let snapshots = self.snapshot_dir.clone().map(SnapshotStore::new);

        let settings = self.settings(vulnerable);
        let invoker = EngineInvoker::new(engine);
        let mut pipeline = Pipeline::new(&invoker, &host, &workspaces, &settings);
        if let Some(approver) = &approver {
            pipeline = pipeline.with_approver(approver);
        }
        if let Some(store) = &snapshots {
            pipeline = pipeline.with_snapshots(store);
        }
        let summary = pipeline.run(&file);

        if json {
            print_json(&summary)?;
        } else {
            print_table(&summary, self.dry_run);
        }
        Ok(match summary.verdict() {
            RunVerdict::Failed => ExitCode::FAILURE,
            _ => ExitCode::SUCCESS,
        })
    }

    fn settings(&self, vulnerable: BTreeMap<String, Vec<String>>) -> PipelineSettings {
        let mut settings = PipelineSettings::new(
            self.repository.source(),
            CredentialSources {
                platform_token: self.repository.token.clone(),
                github_token: self.github_token.clone(),
            },
        );
        settings.experiments = parse_experiments(&self.experiments);
        settings.run_options = RunOptions {
            timeout: Duration::from_secs(self.job_timeout_minutes.saturating_mul(60)),
            updater_image: self.updater_image.clone(),
            proxy_image: self.proxy_image.clone(),
            collector_image: None,
            github_access_token: self.github_token.clone(),
        };
        settings.pull_requests = PullRequestOptions {
            dry_run: self.dry_run,
            skip_pull_requests: self.skip_pull_requests,
            skip_pull_request_updates: self.skip_pull_request_updates,
            skip_pull_request_close: self.skip_pull_request_close,
            author: CommitAuthor {
                name: self.author_name.clone(),
                email: self.author_email.clone(),
            },
            auto_complete: self.auto_complete.then(|| AutoComplete {
                merge_strategy: self.merge_strategy,
                ignore_config_ids: self.auto_complete_ignore_config_ids.clone(),
                delete_source_branch: true,
            }),
            auto_approve: self.auto_approve,
            comment_on_close: !self.no_close_comments,
            work_item: self.work_item.clone(),
        };
        settings.debug = self.debug;
        settings.vulnerable = vulnerable;
        settings.creator = self.creator.clone();
        settings
    }
}

/// Load the configuration and fill `${{ VAR }}` registry secrets from the
/// environment.
fn load_config(path: &Path) -> Result<UpdateConfigFile> {
    let mut file = config::load_at(path)
        .with_context(|| format!("failed to load update configuration {}", path.display()))?;
    for (_, registry) in file.registries.iter_mut() {
        registry.resolve_placeholders(|name| std::env::var(name).ok());
    }
    Ok(file)
}

fn load_vulnerabilities(path: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: BTreeMap<String, Vec<String>> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse vulnerabilities file {}", path.display()))?;
    if parsed.values().any(|names| names.iter().any(|n| n.trim().is_empty())) {
        bail!("vulnerabilities file {} lists an empty dependency name", path.display());
    }
    Ok(parsed)
}

#[derive(Serialize)]
struct RunSummaryJson<'a> {
    verdict: &'static str,
    created: usize,
    updated: usize,
    closed: usize,
    jobs: Vec<JobSummaryJson<'a>>,
}

#[derive(Serialize)]
struct JobSummaryJson<'a> {
    job_id: &'a str,
    package_manager: &'a str,
    target: &'a str,
    verdict: &'static str,
    message: &'a str,
    created: &'a [i64],
    updated: &'a [i64],
    closed: &'a [i64],
    failures: Vec<FailureJson<'a>>,
}

#[derive(Serialize)]
struct FailureJson<'a> {
    index: usize,
    kind: &'a str,
    message: &'a str,
}

#[derive(Tabled)]
struct JobTableRow {
    #[tabled(rename = "job")]
    job: String,
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "result")]
    verdict: String,
    #[tabled(rename = "created")]
    created: usize,
    #[tabled(rename = "updated")]
    updated: usize,
    #[tabled(rename = "closed")]
    closed: usize,
}

fn print_json(summary: &RunSummary) -> Result<()> {
    let payload = RunSummaryJson {
        verdict: summary.verdict().as_str(),
        created: summary.created(),
        updated: summary.updated(),
        closed: summary.closed(),
        jobs: summary
            .jobs
            .iter()
            .map(|job| JobSummaryJson {
                job_id: &job.job_id,
                package_manager: &job.package_manager.0,
                target: &job.target,
                verdict: job.report.verdict.as_str(),
                message: &job.report.message,
                created: &job.report.created,
                updated: &job.report.updated,
                closed: &job.report.closed,
                failures: job
                    .report
                    .failures()
                    .filter_map(|event| match &event.outcome {
                        EventOutcome::Failed { message, .. } => {
                            Some(FailureJson {
                                index: event.index,
                                kind: &event.kind,
                                message,
                            })
                        }
                        _ => None,
                    })
                    .collect(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize run summary")?
    );
    Ok(())
}

fn print_table(summary: &RunSummary, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if summary.jobs.is_empty() {
        println!("{prefix}No update jobs ran.");
        return;
    }

    let rows: Vec<JobTableRow> = summary
        .jobs
        .iter()
        .map(|job| JobTableRow {
            job: job.package_manager.to_string(),
            target: job.target.clone(),
            verdict: verdict_label(job.report.verdict),
            created: job.report.created.len(),
            updated: job.report.updated.len(),
            closed: job.report.closed.len(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for job in &summary.jobs {
        print_failures(job);
    }
    println!(
        "{prefix}{}: {} created, {} updated, {} closed",
        verdict_label(summary.verdict()),
        summary.created(),
        summary.updated(),
        summary.closed()
    );
}

fn print_failures(job: &JobSummary) {
    if job.report.verdict == RunVerdict::Failed && job.report.events.is_empty() {
        println!("{} {} {}: {}", "✗".red(), job.package_manager, job.target, job.report.message);
        return;
    }
    for event in job.report.failures() {
        if let EventOutcome::Failed { message, .. } = &event.outcome {
            println!(
                "{} {} {} event {} ({}): {message}",
                "✗".red(),
                job.package_manager,
                job.target,
                event.index,
                event.kind
            );
        }
    }
}

fn verdict_label(verdict: RunVerdict) -> String {
    match verdict {
        RunVerdict::Skipped => verdict.as_str().bright_black().to_string(),
        RunVerdict::Succeeded => verdict.as_str().green().to_string(),
        RunVerdict::SucceededWithIssues => verdict.as_str().yellow().to_string(),
        RunVerdict::Failed => verdict.as_str().red().bold().to_string(),
    }
}
