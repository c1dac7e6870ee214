//! The pull-request operations the reconciler needs from a hosting platform.
//!
//! Reads report failure as `None` or an empty list and writes as `None` or
//! `false`: the caller can only treat a failed call as absent data or a
//! failed event. Implementations log the underlying error.

use depsync_core::{ExistingPullRequestRecord, PullRequestProperty};

/// How a file is changed by a pushed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Add,
    Edit,
    Delete,
}

impl FileChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: FileChangeKind,
    /// Repository path with a leading `/`.
    pub path: String,
    /// Raw file bytes; ignored for deletions.
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    NoFastForward,
    #[default]
    Squash,
    Rebase,
    RebaseMerge,
}

impl MergeStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "nofastforward" | "merge" => Some(Self::NoFastForward),
            "squash" => Some(Self::Squash),
            "rebase" => Some(Self::Rebase),
            "rebasemerge" => Some(Self::RebaseMerge),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoFastForward => "noFastForward",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
            Self::RebaseMerge => "rebaseMerge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutoComplete {
    pub merge_strategy: MergeStrategy,
    /// Policy configuration ids that may be bypassed.
    pub ignore_config_ids: Vec<i64>,
    pub delete_source_branch: bool,
}

/// Everything needed to push a branch and open a pull request from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub base_commit_sha: String,
    pub author: Option<CommitAuthor>,
    pub title: String,
    pub description: String,
    pub commit_message: String,
    pub changes: Vec<FileChange>,
    pub properties: Vec<PullRequestProperty>,
    /// Emails or display names; added as optional reviewers.
    pub reviewers: Vec<String>,
    /// Emails or display names; added as required reviewers.
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub work_item: Option<String>,
    pub auto_complete: Option<AutoComplete>,
}

/// A rebase-and-push of an open pull request's source branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRebase {
    pub pull_request_id: i64,
    pub source_branch: String,
    /// Tip of the source branch before the reset.
    pub current_commit: String,
    pub base_commit_sha: String,
    pub author: Option<CommitAuthor>,
    pub commit_message: String,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestAbandon {
    pub pull_request_id: i64,
    pub comment: Option<String>,
    pub delete_source_branch: bool,
}

/// The parts of an open pull request the update rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDetail {
    pub id: i64,
    pub title: String,
    pub is_draft: bool,
    /// Branch names without the `refs/heads/` prefix.
    pub source_branch: String,
    pub target_branch: String,
    pub merge_status: Option<String>,
    pub last_source_commit: Option<String>,
}

impl PullRequestDetail {
    pub fn has_conflicts(&self) -> bool {
        self.merge_status.as_deref() == Some("conflicts")
    }
}

pub trait PullRequestHost {
    fn provider_name(&self) -> &'static str;

    fn default_branch(&self) -> Option<String>;

    /// Branch names without the `refs/heads/` prefix.
    fn branch_names(&self) -> Vec<String>;

    /// Active pull requests (optionally only those created by `created_by`)
    /// with their properties.
    fn active_pull_requests(&self, created_by: Option<&str>) -> Vec<ExistingPullRequestRecord>;

    fn pull_request(&self, id: i64) -> Option<PullRequestDetail>;

    /// Author emails of every commit on the pull request.
    fn pull_request_commit_authors(&self, id: i64) -> Option<Vec<String>>;

    /// Commits `branch` lacks from `base`.
    fn branch_behind_count(&self, branch: &str, base: &str) -> Option<u64>;

    fn create_pull_request(&self, request: &NewPullRequest) -> Option<i64>;

    fn update_pull_request(&self, rebase: &PullRequestRebase) -> bool;

    fn abandon_pull_request(&self, abandon: &PullRequestAbandon) -> bool;

    /// Cast an approving vote as the authenticated user.
    fn approve_pull_request(&self, id: i64) -> bool;

    fn current_user_id(&self) -> Option<String>;

    /// Resolve an email or display name to a platform identity id.
    fn resolve_identity(&self, email_or_name: &str) -> Option<String>;
}

/// Strip `refs/heads/` from a ref name.
pub fn branch_from_ref(ref_name: &str) -> &str {
    ref_name.strip_prefix("refs/heads/").unwrap_or(ref_name)
}

/// `refs/heads/<branch>`, leaving already-qualified refs alone.
pub fn ref_from_branch(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}
