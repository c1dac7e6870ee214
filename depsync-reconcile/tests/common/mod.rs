//! In-memory host and job runner shared by the reconcile integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

use depsync_core::{
    DependencyIdentity, DependencyRef, ExistingPullRequestRecord, JobFile, PackageManager,
    UpdateConfigFile,
};
use depsync_engine::{
    EngineError, JobRunner, JobWorkspace, OutputEvent, RunOptions, RunReport, RunState,
};
use depsync_host::{
    NewPullRequest, PullRequestAbandon, PullRequestDetail, PullRequestHost, PullRequestRebase,
};
use serde_json::Value;

pub fn config(yaml: &str) -> UpdateConfigFile {
    UpdateConfigFile::from_yaml_str(yaml, Path::new("dependabot.yml")).unwrap()
}

pub fn event(kind: &str, data: Value) -> OutputEvent {
    OutputEvent::from_raw(kind, data).unwrap()
}

pub fn npm_record(id: i64, deps: &[(&str, &str)]) -> ExistingPullRequestRecord {
    let deps = deps
        .iter()
        .map(|(name, version)| DependencyRef::new(*name, *version))
        .collect();
    ExistingPullRequestRecord::managed(
        id,
        &PackageManager::from_ecosystem("npm"),
        &DependencyIdentity::from_parts(None, deps),
    )
}

pub fn detail(id: i64, branch: &str) -> PullRequestDetail {
    PullRequestDetail {
        id,
        title: format!("PR {id}"),
        is_draft: false,
        source_branch: branch.to_string(),
        target_branch: "main".to_string(),
        merge_status: Some("succeeded".to_string()),
        last_source_commit: Some("0123abcd".to_string()),
    }
}

/// Records every write and answers reads from preset state.
pub struct FakeHost {
    pub default_branch: Option<String>,
    pub branches: Vec<String>,
    pub open: Vec<ExistingPullRequestRecord>,
    pub details: HashMap<i64, PullRequestDetail>,
    pub authors: HashMap<i64, Vec<String>>,
    pub behind: HashMap<String, u64>,
    pub fail_writes: bool,
    pub next_id: Cell<i64>,
    pub created: RefCell<Vec<NewPullRequest>>,
    pub rebased: RefCell<Vec<PullRequestRebase>>,
    pub abandoned: RefCell<Vec<PullRequestAbandon>>,
    pub approved: RefCell<Vec<i64>>,
    pub branch_reads: Cell<usize>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            default_branch: Some("main".to_string()),
            branches: vec!["main".to_string()],
            open: Vec::new(),
            details: HashMap::new(),
            authors: HashMap::new(),
            behind: HashMap::new(),
            fail_writes: false,
            next_id: Cell::new(100),
            created: RefCell::default(),
            rebased: RefCell::default(),
            abandoned: RefCell::default(),
            approved: RefCell::default(),
            branch_reads: Cell::new(0),
        }
    }
}

impl FakeHost {
    /// An open PR the update rules will act on.
    pub fn with_open_pr(mut self, record: ExistingPullRequestRecord, branch: &str) -> Self {
        let id = record.id;
        self.details.insert(id, detail(id, branch));
        self.authors
            .insert(id, vec!["noreply@github.com".to_string()]);
        self.behind.insert(branch.to_string(), 2);
        self.branches.push(branch.to_string());
        self.open.push(record);
        self
    }
}

impl PullRequestHost for FakeHost {
    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn default_branch(&self) -> Option<String> {
        self.default_branch.clone()
    }

    fn branch_names(&self) -> Vec<String> {
        self.branch_reads.set(self.branch_reads.get() + 1);
        self.branches.clone()
    }

    fn active_pull_requests(&self, _created_by: Option<&str>) -> Vec<ExistingPullRequestRecord> {
        self.open.clone()
    }

    fn pull_request(&self, id: i64) -> Option<PullRequestDetail> {
        self.details.get(&id).cloned()
    }

    fn pull_request_commit_authors(&self, id: i64) -> Option<Vec<String>> {
        self.authors.get(&id).cloned()
    }

    fn branch_behind_count(&self, branch: &str, _base: &str) -> Option<u64> {
        self.behind.get(branch).copied()
    }

    fn create_pull_request(&self, request: &NewPullRequest) -> Option<i64> {
        if self.fail_writes {
            return None;
        }
        self.created.borrow_mut().push(request.clone());
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Some(id)
    }

    fn update_pull_request(&self, rebase: &PullRequestRebase) -> bool {
        self.rebased.borrow_mut().push(rebase.clone());
        !self.fail_writes
    }

    fn abandon_pull_request(&self, abandon: &PullRequestAbandon) -> bool {
        self.abandoned.borrow_mut().push(abandon.clone());
        !self.fail_writes
    }

    fn approve_pull_request(&self, id: i64) -> bool {
        self.approved.borrow_mut().push(id);
        true
    }

    fn current_user_id(&self) -> Option<String> {
        Some("bot-user".to_string())
    }

    fn resolve_identity(&self, email_or_name: &str) -> Option<String> {
        Some(format!("id-{email_or_name}"))
    }
}

/// Hands out scripted event batches in call order and keeps the job files.
#[derive(Default)]
pub struct FakeRunner {
    pub batches: RefCell<Vec<Result<Vec<OutputEvent>, String>>>,
    pub jobs: RefCell<Vec<JobFile>>,
}

impl FakeRunner {
    pub fn with_batches(batches: Vec<Vec<OutputEvent>>) -> Self {
        Self {
            batches: RefCell::new(batches.into_iter().map(Ok).collect()),
            jobs: RefCell::default(),
        }
    }
}

impl JobRunner for FakeRunner {
    fn run(
        &self,
        workspace: &JobWorkspace,
        job: &JobFile,
        _options: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        self.jobs.borrow_mut().push(job.clone());
        let mut batches = self.batches.borrow_mut();
        let next = if batches.is_empty() {
            Ok(Vec::new())
        } else {
            batches.remove(0)
        };
        match next {
            Ok(events) => Ok(RunReport {
                job_id: workspace.job_id.0.clone(),
                state: RunState::Completed,
                events,
            }),
            Err(program) => Err(EngineError::EngineUnavailable(program)),
        }
    }
}
