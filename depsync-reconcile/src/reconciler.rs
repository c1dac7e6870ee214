//! Turns engine output events into pull-request operations.
//!
//! Events are handled strictly in order. Each handler yields an
//! [`EventOutcome`]; a failed event is recorded and the next one is handled
//! regardless.
//!
//! Pull requests created during a call are kept in an in-run arena so that
//! later events see them: the open-PR limit counts them, duplicate
//! identities are refused, and their branches count as taken.

use base64::Engine as _;

use depsync_core::types::{find_matching, PROPERTY_DEPENDENCIES, PROPERTY_PACKAGE_MANAGER};
use depsync_core::{
    branch_name, DependencyIdentity, ExistingPullRequestRecord, PackageManager,
    PullRequestProperty, UpdateConfig,
};
use depsync_engine::output::{
    ChangeKind, ClosePullRequest, CreatePullRequest, DependencyFile, DependencyListSnapshot,
    JobErrorReport, UpdatePullRequest,
};
use depsync_engine::OutputEvent;
use depsync_host::{
    AutoComplete, CommitAuthor, FileChange, FileChangeKind, NewPullRequest, PullRequestAbandon,
    PullRequestHost, PullRequestRebase,
};

use crate::messages::{close_comment, truncate_description};
use crate::outcome::{EventOutcome, EventRecord, ReconcileReport};
use crate::snapshot::SnapshotStore;

pub const DEFAULT_AUTHOR_NAME: &str = "dependabot[bot]";
pub const DEFAULT_AUTHOR_EMAIL: &str = "noreply@github.com";

const CONFLICT_COMMIT_MESSAGE: &str = "Resolve merge conflicts";
const REBASE_COMMIT_MESSAGE: &str = "Update dependency files";

/// Switches and defaults for every pull-request operation in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestOptions {
    pub dry_run: bool,
    pub skip_pull_requests: bool,
    pub skip_pull_request_updates: bool,
    pub skip_pull_request_close: bool,
    /// Identity of pushed commits; other authors mark a PR as hand-edited.
    pub author: CommitAuthor,
    pub auto_complete: Option<AutoComplete>,
    /// Approve created and updated PRs with the approver host.
    pub auto_approve: bool,
    pub comment_on_close: bool,
    pub work_item: Option<String>,
}

impl Default for PullRequestOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_pull_requests: false,
            skip_pull_request_updates: false,
            skip_pull_request_close: false,
            author: CommitAuthor {
                name: DEFAULT_AUTHOR_NAME.to_string(),
                email: DEFAULT_AUTHOR_EMAIL.to_string(),
            },
            auto_complete: None,
            auto_approve: false,
            comment_on_close: true,
            work_item: None,
        }
    }
}

/// Reconciles the output of jobs for one update entry.
pub struct Reconciler<'a> {
    host: &'a dyn PullRequestHost,
    approver: Option<&'a dyn PullRequestHost>,
    update: &'a UpdateConfig,
    options: &'a PullRequestOptions,
    package_manager: PackageManager,
    snapshots: Option<&'a SnapshotStore>,
}

/// State that only lives for one [`Reconciler::process`] call.
#[derive(Default)]
struct RunArena {
    created: Vec<ExistingPullRequestRecord>,
    branches: Option<Vec<String>>,
    default_branch: Option<Option<String>>,
    created_ids: Vec<i64>,
    updated_ids: Vec<i64>,
    closed_ids: Vec<i64>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        host: &'a dyn PullRequestHost,
        update: &'a UpdateConfig,
        options: &'a PullRequestOptions,
    ) -> Self {
        Self {
            host,
            approver: None,
            update,
            options,
            package_manager: PackageManager::from_ecosystem(&update.package_ecosystem),
            snapshots: None,
        }
    }

    /// Host used to cast approval votes (a second identity).
    pub fn with_approver(mut self, approver: &'a dyn PullRequestHost) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_snapshots(mut self, store: &'a SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn package_manager(&self) -> &PackageManager {
        &self.package_manager
    }

    /// Handle `events` in order against `existing`, the open PRs read before
    /// the run. Abandoned PRs are removed from `existing`.
    pub fn process(
        &self,
        events: &[OutputEvent],
        existing: &mut Vec<ExistingPullRequestRecord>,
    ) -> ReconcileReport {
        let mut arena = RunArena::default();
        let mut records = Vec::with_capacity(events.len());

        for (index, event) in events.iter().enumerate() {
            let outcome = self.handle(event, existing, &mut arena);
            match &outcome {
                EventOutcome::Succeeded => {
                    tracing::debug!(index, kind = event.kind(), "event processed")
                }
                EventOutcome::Skipped(reason) => {
                    tracing::info!(index, kind = event.kind(), "event skipped: {reason}")
                }
                EventOutcome::Failed { message, .. } => {
                    tracing::warn!(index, kind = event.kind(), "event failed: {message}")
                }
            }
            records.push(EventRecord {
                index,
                kind: event.kind().to_string(),
                outcome,
            });
        }

        ReconcileReport::new(records, arena.created_ids, arena.updated_ids, arena.closed_ids)
    }

    fn handle(
        &self,
        event: &OutputEvent,
        existing: &mut Vec<ExistingPullRequestRecord>,
        arena: &mut RunArena,
    ) -> EventOutcome {
        match event {
            OutputEvent::UpdateDependencyList(snapshot) => self.record_snapshot(snapshot),
            OutputEvent::CreatePullRequest(create) => self.create(create, existing, arena),
            OutputEvent::UpdatePullRequest(update) => self.refresh(update, existing, arena),
            OutputEvent::ClosePullRequest(close) => self.close(close, existing, arena),
            OutputEvent::MarkAsProcessed(_)
            | OutputEvent::RecordEcosystemVersions(_)
            | OutputEvent::RecordEcosystemMeta(_)
            | OutputEvent::IncrementMetric(_) => EventOutcome::Succeeded,
            OutputEvent::RecordUpdateJobError(report) => job_error(report, "update job error"),
            OutputEvent::RecordUpdateJobUnknownError(report) => {
                job_error(report, "unknown update job error")
            }
            OutputEvent::Unknown { kind, .. } => {
                tracing::warn!("unknown engine output type '{kind}' ignored");
                EventOutcome::Succeeded
            }
        }
    }

    // -----------------------------------------------------------------------
    // update_dependency_list
    // -----------------------------------------------------------------------

    fn record_snapshot(&self, snapshot: &DependencyListSnapshot) -> EventOutcome {
        if let Some(store) = self.snapshots {
            if let Err(e) = store.save(
                &self.package_manager.0,
                self.update.primary_directory(),
                snapshot,
            ) {
                tracing::warn!("could not store dependency snapshot: {e}");
            }
        }
        EventOutcome::Succeeded
    }

    // -----------------------------------------------------------------------
    // create_pull_request
    // -----------------------------------------------------------------------

    fn create(
        &self,
        event: &CreatePullRequest,
        existing: &[ExistingPullRequestRecord],
        arena: &mut RunArena,
    ) -> EventOutcome {
        if self.options.skip_pull_requests {
            return EventOutcome::skipped("pull request creation is disabled");
        }
        if self.options.dry_run {
            return EventOutcome::skipped(format!("dry run: would create '{}'", event.pr_title));
        }

        let limit = self.update.open_pull_requests_limit as usize;
        let open = existing
            .iter()
            .filter(|r| r.package_manager() == Some(self.package_manager.0.as_str()))
            .count()
            + arena.created.len();
        if limit > 0 && open >= limit {
            return EventOutcome::skipped(format!(
                "open pull request limit ({limit}) reached for {}",
                self.package_manager
            ));
        }

        let names = event.dependency_names();
        let already_open = find_matching(existing, &self.package_manager, names.as_slice())
            .or_else(|| find_matching(&arena.created, &self.package_manager, names.as_slice()));
        if let Some(record) = already_open {
            tracing::warn!(
                pr = record.id,
                "pull request #{} already covers {}; not creating a duplicate",
                record.id,
                names.join(", ")
            );
            return EventOutcome::skipped(format!("already open as #{}", record.id));
        }

        let dependencies = event.dependency_refs();
        let directory = self.update.primary_directory().or_else(|| {
            event
                .dependencies
                .iter()
                .find_map(|d| d.directory.as_deref())
        });
        let source_branch = branch_name(
            &self.update.package_ecosystem,
            self.update.target_branch.as_deref(),
            directory,
            event.group_name(),
            &dependencies,
            self.update.branch_separator(),
        );

        let conflict = arena
            .branches
            .get_or_insert_with(|| self.host.branch_names())
            .iter()
            .find(|b| branches_conflict(b, &source_branch))
            .cloned();
        if let Some(conflict) = conflict {
            return EventOutcome::failed(format!(
                "branch '{source_branch}' conflicts with existing branch '{conflict}'; \
                 delete it manually to let the update through"
            ));
        }

        let target_branch = match self.target_branch(arena) {
            Some(branch) => branch,
            None => return EventOutcome::failed("could not determine the target branch"),
        };

        let changes = match file_changes(&event.updated_dependency_files) {
            Ok(changes) => changes,
            Err(message) => return EventOutcome::failed(message),
        };

        let identity = DependencyIdentity::from_parts(event.group_name(), dependencies);
        let request = NewPullRequest {
            source_branch: source_branch.clone(),
            target_branch,
            base_commit_sha: event.base_commit_sha.clone(),
            author: Some(self.options.author.clone()),
            title: event.pr_title.clone(),
            description: truncate_description(event.pr_body.as_deref().unwrap_or_default()),
            commit_message: event.commit_message.clone(),
            changes,
            properties: vec![
                PullRequestProperty {
                    name: PROPERTY_PACKAGE_MANAGER.to_string(),
                    value: self.package_manager.0.clone(),
                },
                PullRequestProperty {
                    name: PROPERTY_DEPENDENCIES.to_string(),
                    value: identity.to_property_value(),
                },
            ],
            reviewers: self.update.reviewers.clone(),
            assignees: self.update.assignees.clone(),
            labels: self.update.labels.clone(),
            work_item: self
                .options
                .work_item
                .clone()
                .or_else(|| self.update.milestone.map(|m| m.to_string())),
            auto_complete: self.options.auto_complete.clone(),
        };

        let Some(id) = self.host.create_pull_request(&request) else {
            return EventOutcome::failed(format!("failed to create pull request '{}'", event.pr_title));
        };
        self.approve(id);

        arena
            .created
            .push(ExistingPullRequestRecord::managed(id, &self.package_manager, &identity));
        arena
            .branches
            .get_or_insert_with(Vec::new)
            .push(source_branch);
        arena.created_ids.push(id);
        EventOutcome::Succeeded
    }

    fn target_branch(&self, arena: &mut RunArena) -> Option<String> {
        if let Some(branch) = self.update.target_branch.as_ref().filter(|b| !b.is_empty()) {
            return Some(branch.clone());
        }
        arena
            .default_branch
            .get_or_insert_with(|| self.host.default_branch())
            .clone()
    }

    // -----------------------------------------------------------------------
    // update_pull_request
    // -----------------------------------------------------------------------

    fn refresh(
        &self,
        event: &UpdatePullRequest,
        existing: &[ExistingPullRequestRecord],
        arena: &mut RunArena,
    ) -> EventOutcome {
        if self.options.skip_pull_request_updates {
            return EventOutcome::skipped("pull request updates are disabled");
        }
        if self.options.dry_run {
            return EventOutcome::skipped("dry run: would update pull request");
        }

        let names = event.dependency_names.as_slice();
        let Some(record) = find_matching(existing, &self.package_manager, names)
            .or_else(|| find_matching(&arena.created, &self.package_manager, names))
        else {
            return EventOutcome::failed(format!(
                "no open pull request found for {}",
                names.join(", ")
            ));
        };
        let id = record.id;

        let Some(pr) = self.host.pull_request(id) else {
            return EventOutcome::failed(format!("could not read pull request #{id}"));
        };
        if pr.is_draft {
            return EventOutcome::skipped(format!("pull request #{id} is a draft"));
        }

        let Some(authors) = self.host.pull_request_commit_authors(id) else {
            return EventOutcome::failed(format!("could not read commits of pull request #{id}"));
        };
        let expected = &self.options.author.email;
        if authors.iter().any(|a| !a.eq_ignore_ascii_case(expected)) {
            return EventOutcome::skipped(format!(
                "pull request #{id} has commits from other authors"
            ));
        }

        match self.host.branch_behind_count(&pr.source_branch, &pr.target_branch) {
            None => {
                return EventOutcome::failed(format!(
                    "could not compare '{}' with '{}'",
                    pr.source_branch, pr.target_branch
                ))
            }
            Some(0) => {
                return EventOutcome::skipped(format!(
                    "pull request #{id} is not behind '{}'",
                    pr.target_branch
                ))
            }
            Some(_) => {}
        }

        let Some(current_commit) = pr.last_source_commit.clone() else {
            return EventOutcome::failed(format!("source commit of pull request #{id} is unknown"));
        };
        let changes = match file_changes(&event.updated_dependency_files) {
            Ok(changes) => changes,
            Err(message) => return EventOutcome::failed(message),
        };
        let commit_message = if pr.has_conflicts() {
            CONFLICT_COMMIT_MESSAGE
        } else {
            REBASE_COMMIT_MESSAGE
        };

        let rebased = self.host.update_pull_request(&PullRequestRebase {
            pull_request_id: id,
            source_branch: pr.source_branch.clone(),
            current_commit,
            base_commit_sha: event.base_commit_sha.clone(),
            author: Some(self.options.author.clone()),
            commit_message: commit_message.to_string(),
            changes,
        });
        if !rebased {
            return EventOutcome::failed(format!("failed to update pull request #{id}"));
        }
        self.approve(id);
        arena.updated_ids.push(id);
        EventOutcome::Succeeded
    }

    // -----------------------------------------------------------------------
    // close_pull_request
    // -----------------------------------------------------------------------

    fn close(
        &self,
        event: &ClosePullRequest,
        existing: &mut Vec<ExistingPullRequestRecord>,
        arena: &mut RunArena,
    ) -> EventOutcome {
        if self.options.skip_pull_request_close {
            return EventOutcome::skipped("closing pull requests is disabled");
        }
        if self.options.dry_run {
            return EventOutcome::skipped("dry run: would close pull request");
        }

        let names = event.dependency_names.as_slice();
        let Some(id) = find_matching(existing, &self.package_manager, names)
            .or_else(|| find_matching(&arena.created, &self.package_manager, names))
            .map(|r| r.id)
        else {
            return EventOutcome::failed(format!(
                "no open pull request found for {}",
                names.join(", ")
            ));
        };

        let reason = event.reason.as_deref().unwrap_or_default();
        let comment = close_comment(reason, names);
        if comment.is_none() {
            tracing::warn!(pr = id, "close reason '{reason}' is not handled; closing without a comment");
        }
        let abandoned = self.host.abandon_pull_request(&PullRequestAbandon {
            pull_request_id: id,
            comment: comment.filter(|_| self.options.comment_on_close),
            delete_source_branch: true,
        });
        if !abandoned {
            return EventOutcome::failed(format!("failed to close pull request #{id}"));
        }

        existing.retain(|r| r.id != id);
        arena.created.retain(|r| r.id != id);
        arena.closed_ids.push(id);
        EventOutcome::Succeeded
    }

    fn approve(&self, id: i64) {
        if !self.options.auto_approve {
            return;
        }
        match self.approver {
            Some(approver) if approver.approve_pull_request(id) => {
                tracing::info!(pr = id, "approved pull request");
            }
            Some(_) => tracing::warn!(pr = id, "approval failed"),
            None => tracing::warn!(pr = id, "auto-approve is on but no approver is configured"),
        }
    }
}

fn job_error(report: &JobErrorReport, label: &str) -> EventOutcome {
    EventOutcome::Failed {
        message: format!("{label}: {}", report.error_type),
        payload: Some(report.raw.clone()),
    }
}

/// Same branch, or one is a path prefix of the other (git cannot hold both).
pub fn branches_conflict(existing: &str, candidate: &str) -> bool {
    existing == candidate
        || existing.starts_with(&format!("{candidate}/"))
        || candidate.starts_with(&format!("{existing}/"))
}

fn file_changes(files: &[DependencyFile]) -> Result<Vec<FileChange>, String> {
    files
        .iter()
        .map(|file| {
            let kind = match file.change_kind() {
                ChangeKind::Add => FileChangeKind::Add,
                ChangeKind::Edit => FileChangeKind::Edit,
                ChangeKind::Delete => FileChangeKind::Delete,
            };
            let raw = file.content.as_deref().unwrap_or_default();
            let content = if file.is_base64() {
                base64::engine::general_purpose::STANDARD
                    .decode(raw)
                    .map_err(|e| format!("invalid base64 content for {}: {e}", file.path()))?
            } else {
                raw.as_bytes().to_vec()
            };
            Ok(FileChange {
                kind,
                path: file.path(),
                content,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("dependabot/npm/a-1", "dependabot/npm/a-1", true)]
    #[case("dependabot/npm", "dependabot/npm/a-1", true)]
    #[case("dependabot/npm/a-1/x", "dependabot/npm/a-1", true)]
    #[case("dependabot/npm/a-10", "dependabot/npm/a-1", false)]
    #[case("main", "dependabot/npm/a-1", false)]
    fn branch_conflicts(#[case] existing: &str, #[case] candidate: &str, #[case] expected: bool) {
        assert_eq!(branches_conflict(existing, candidate), expected);
    }

    #[test]
    fn base64_contents_are_decoded() {
        let files = vec![DependencyFile {
            directory: "/".into(),
            name: "logo.png".into(),
            content: Some("AAEC".into()),
            content_encoding: Some("base64".into()),
            deleted: false,
            operation: Some("create".into()),
        }];
        let changes = file_changes(&files).unwrap();
        assert_eq!(changes[0].content, vec![0, 1, 2]);
        assert_eq!(changes[0].kind, FileChangeKind::Add);
    }

    #[test]
    fn invalid_base64_is_reported() {
        let files = vec![DependencyFile {
            directory: "/".into(),
            name: "bad.bin".into(),
            content: Some("***".into()),
            content_encoding: Some("base64".into()),
            deleted: false,
            operation: None,
        }];
        assert!(file_changes(&files).unwrap_err().contains("/bad.bin"));
    }
}
