//! One reconciliation run over every update entry of a configuration file.
//!
//! Per entry: an "all" (or security) job, then one refresh job per open pull
//! request of that package manager. Jobs run one after another; each job's
//! output is reconciled before the next job is built, so refresh jobs see
//! the pull requests closed by earlier ones.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use depsync_core::job::Experiments;
use depsync_core::{
    CredentialSources, ExistingPullRequestRecord, JobBuilder, JobId, JobRequest, PackageManager,
    RepositorySource, TargetSelector, UpdateConfig, UpdateConfigFile,
};
use depsync_engine::{JobRunner, RunOptions, RunState, WorkspaceRoot};
use depsync_host::PullRequestHost;

use crate::error::ReconcileError;
use crate::outcome::{ReconcileReport, RunVerdict};
use crate::reconciler::{PullRequestOptions, Reconciler};
use crate::snapshot::SnapshotStore;

/// Inputs shared by every job of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source: RepositorySource,
    pub credentials: CredentialSources,
    pub experiments: Experiments,
    pub run_options: RunOptions,
    pub pull_requests: PullRequestOptions,
    pub debug: bool,
    /// Vulnerable dependency names per ecosystem, for security-only updates.
    pub vulnerable: BTreeMap<String, Vec<String>>,
    /// Only pull requests created by this identity count as existing.
    pub creator: Option<String>,
}

impl PipelineSettings {
    pub fn new(source: RepositorySource, credentials: CredentialSources) -> Self {
        Self {
            source,
            credentials,
            experiments: Experiments::new(),
            run_options: RunOptions::default(),
            pull_requests: PullRequestOptions::default(),
            debug: false,
            vulnerable: BTreeMap::new(),
            creator: None,
        }
    }
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: String,
    pub package_manager: PackageManager,
    /// `all`, `security`, or `#<pr id>` for refresh jobs.
    pub target: String,
    /// `None` when the job never ran to completion.
    pub state: Option<RunState>,
    pub report: ReconcileReport,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    pub fn verdict(&self) -> RunVerdict {
        RunVerdict::combine(self.jobs.iter().map(|j| j.report.verdict))
    }

    pub fn created(&self) -> usize {
        self.jobs.iter().map(|j| j.report.created.len()).sum()
    }

    pub fn updated(&self) -> usize {
        self.jobs.iter().map(|j| j.report.updated.len()).sum()
    }

    pub fn closed(&self) -> usize {
        self.jobs.iter().map(|j| j.report.closed.len()).sum()
    }
}

pub struct Pipeline<'a> {
    runner: &'a dyn JobRunner,
    host: &'a dyn PullRequestHost,
    approver: Option<&'a dyn PullRequestHost>,
    workspaces: &'a WorkspaceRoot,
    snapshots: Option<&'a SnapshotStore>,
    settings: &'a PipelineSettings,
    sequence: Cell<u32>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        runner: &'a dyn JobRunner,
        host: &'a dyn PullRequestHost,
        workspaces: &'a WorkspaceRoot,
        settings: &'a PipelineSettings,
    ) -> Self {
        Self {
            runner,
            host,
            approver: None,
            workspaces,
            snapshots: None,
            settings,
            sequence: Cell::new(0),
        }
    }

    pub fn with_approver(mut self, approver: &'a dyn PullRequestHost) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_snapshots(mut self, store: &'a SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Run every update entry of `file` against the host.
    pub fn run(&self, file: &UpdateConfigFile) -> RunSummary {
        let mut existing = self
            .host
            .active_pull_requests(self.settings.creator.as_deref());
        tracing::info!(
            open = existing.len(),
            updates = file.updates.len(),
            "starting reconciliation run"
        );

        let mut summary = RunSummary::default();
        for update in &file.updates {
            self.run_update(file, update, &mut existing, &mut summary.jobs);
        }
        tracing::info!(
            jobs = summary.jobs.len(),
            created = summary.created(),
            updated = summary.updated(),
            closed = summary.closed(),
            "run finished: {}",
            summary.verdict()
        );
        summary
    }

    fn run_update(
        &self,
        file: &UpdateConfigFile,
        update: &UpdateConfig,
        existing: &mut Vec<ExistingPullRequestRecord>,
        jobs: &mut Vec<JobSummary>,
    ) {
        let builder = JobBuilder::new(&self.settings.source, file, update);
        let package_manager = builder.package_manager();

        let (target, label) = if update.is_security_only() {
            let names = self
                .settings
                .vulnerable
                .get(&update.package_ecosystem)
                .filter(|names| !names.is_empty());
            match names {
                Some(names) => (
                    TargetSelector::SecuritySubset {
                        dependency_names: names.clone(),
                        advisories: Vec::new(),
                    },
                    "security",
                ),
                None => {
                    tracing::info!(
                        ecosystem = %update.package_ecosystem,
                        "no vulnerable dependencies reported; skipping security-only update"
                    );
                    return;
                }
            }
        } else {
            (TargetSelector::All, "all")
        };
        jobs.push(self.run_job(&builder, update, target, label.to_string(), existing));

        let options = &self.settings.pull_requests;
        if options.skip_pull_request_updates || options.dry_run {
            return;
        }
        let ids: Vec<i64> = existing
            .iter()
            .filter(|r| r.package_manager() == Some(package_manager.0.as_str()))
            .map(|r| r.id)
            .collect();
        for id in ids {
            // Closed by an earlier job of this run.
            let Some(record) = existing.iter().find(|r| r.id == id).cloned() else {
                continue;
            };
            let target = TargetSelector::ExistingPullRequest(record);
            jobs.push(self.run_job(&builder, update, target, format!("#{id}"), existing));
        }
    }

    fn run_job(
        &self,
        builder: &JobBuilder<'_>,
        update: &UpdateConfig,
        target: TargetSelector,
        label: String,
        existing: &mut Vec<ExistingPullRequestRecord>,
    ) -> JobSummary {
        let job_id = self.next_job_id(&update.package_ecosystem);
        tracing::info!(job = %job_id, target = %label, "running update job");

        let (state, report) = match self.execute(builder, update, &job_id, target, existing) {
            Ok((state, report)) => (Some(state), report),
            Err(e) => {
                tracing::warn!(job = %job_id, "job aborted: {e}");
                (None, ReconcileReport::aborted(e.to_string()))
            }
        };
        tracing::info!(job = %job_id, "{}: {}", report.verdict, report.message);

        JobSummary {
            job_id: job_id.0,
            package_manager: builder.package_manager(),
            target: label,
            state,
            report,
        }
    }

    fn execute(
        &self,
        builder: &JobBuilder<'_>,
        update: &UpdateConfig,
        job_id: &JobId,
        target: TargetSelector,
        existing: &mut Vec<ExistingPullRequestRecord>,
    ) -> Result<(RunState, ReconcileReport), ReconcileError> {
        let job = builder.build(JobRequest {
            id: job_id.clone(),
            target,
            existing_pull_requests: existing.as_slice(),
            experiments: self.settings.experiments.clone(),
            credentials: self.settings.credentials.clone(),
            debug: self.settings.debug,
        })?;
        let workspace = self.workspaces.prepare(job_id)?;
        let run = self
            .runner
            .run(&workspace, &job, &self.settings.run_options)?;

        let mut reconciler = Reconciler::new(self.host, update, &self.settings.pull_requests);
        if let Some(approver) = self.approver {
            reconciler = reconciler.with_approver(approver);
        }
        if let Some(store) = self.snapshots {
            reconciler = reconciler.with_snapshots(store);
        }
        let report = reconciler.process(&run.events, existing);
        Ok((run.state, report))
    }

    /// `<ecosystem>-<pid>-<millis>-<seq>`
    fn next_job_id(&self, ecosystem: &str) -> JobId {
        let seq = self.sequence.get() + 1;
        self.sequence.set(seq);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        JobId(format!("{ecosystem}-{}-{millis}-{seq}", std::process::id()))
    }
}
