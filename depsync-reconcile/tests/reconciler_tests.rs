//! Output reconciliation against an in-memory host.

mod common;

use common::{config, event, npm_record, FakeHost};
use depsync_core::types::{PROPERTY_DEPENDENCIES, PROPERTY_PACKAGE_MANAGER};
use depsync_host::FileChangeKind;
use depsync_reconcile::{EventOutcome, PullRequestOptions, Reconciler, RunVerdict, SnapshotStore};
use serde_json::json;
use tempfile::TempDir;

const NPM: &str = r#"
version: 2
updates:
  - package-ecosystem: npm
    directory: /
    open-pull-requests-limit: 2
    reviewers: [lead@contoso.com]
    labels: [dependencies]
"#;

fn create_lodash() -> depsync_engine::OutputEvent {
    event(
        "create_pull_request",
        json!({
            "base-commit-sha": "abc123",
            "dependencies": [
                {"name": "lodash", "version": "4.17.21", "previous-version": "4.17.20"}
            ],
            "updated-dependency-files": [
                {"directory": "/", "name": "package.json", "content": "{}"}
            ],
            "pr-title": "Bump lodash from 4.17.20 to 4.17.21",
            "pr-body": "Bumps lodash.",
            "commit-message": "Bump lodash"
        }),
    )
}

fn create_single(name: &str) -> depsync_engine::OutputEvent {
    event(
        "create_pull_request",
        json!({
            "base-commit-sha": "abc123",
            "dependencies": [{"name": name, "version": "2.0.0"}],
            "updated-dependency-files": [],
            "pr-title": format!("Bump {name}"),
            "commit-message": format!("Bump {name}")
        }),
    )
}

fn update_lodash() -> depsync_engine::OutputEvent {
    event(
        "update_pull_request",
        json!({
            "base-commit-sha": "def456",
            "dependency-names": ["lodash"],
            "updated-dependency-files": [
                {"directory": "/", "name": "package-lock.json", "content": "{}"}
            ]
        }),
    )
}

#[test]
fn create_opens_pull_request_with_identity_properties() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let mut existing = Vec::new();

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[create_lodash()], &mut existing);

    assert_eq!(report.verdict, RunVerdict::Succeeded);
    assert_eq!(report.created, vec![100]);
    let created = host.created.borrow();
    let pr = &created[0];
    assert_eq!(pr.source_branch, "dependabot/npm/lodash-4.17.21");
    assert_eq!(pr.target_branch, "main");
    assert_eq!(pr.reviewers, vec!["lead@contoso.com".to_string()]);
    assert_eq!(pr.changes[0].path, "/package.json");
    assert_eq!(pr.changes[0].kind, FileChangeKind::Edit);
    let property = |name: &str| {
        pr.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.clone())
    };
    assert_eq!(property(PROPERTY_PACKAGE_MANAGER).as_deref(), Some("npm_and_yarn"));
    assert!(property(PROPERTY_DEPENDENCIES).unwrap().contains("lodash"));
}

#[test]
fn duplicate_create_in_one_run_is_skipped() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let mut existing = Vec::new();

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[create_lodash(), create_lodash()], &mut existing);

    assert_eq!(host.created.borrow().len(), 1);
    assert!(matches!(report.events[1].outcome, EventOutcome::Skipped(_)));
    assert_eq!(report.verdict, RunVerdict::Succeeded);
    assert_eq!(host.branch_reads.get(), 1, "branches are read once per call");
}

#[test]
fn already_open_identity_is_not_recreated() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let mut existing = vec![npm_record(7, &[("lodash", "4.17.21")])];

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[create_lodash()], &mut existing);

    assert!(host.created.borrow().is_empty());
    assert_eq!(
        report.events[0].outcome,
        EventOutcome::Skipped("already open as #7".into())
    );
}

#[test]
fn open_pull_request_limit_counts_this_run() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let mut existing = vec![npm_record(7, &[("react", "18.0.0")])];

    let report = Reconciler::new(&host, &file.updates[0], &options).process(
        &[create_single("axios"), create_single("chalk")],
        &mut existing,
    );

    assert_eq!(host.created.borrow().len(), 1);
    match &report.events[1].outcome {
        EventOutcome::Skipped(reason) => assert!(reason.contains("limit (2)")),
        other => panic!("expected a limit skip, got {other:?}"),
    }
}

#[test]
fn conflicting_branch_fails_the_event() {
    let file = config(NPM);
    let host = FakeHost {
        branches: vec!["main".into(), "dependabot/npm".into()],
        ..FakeHost::default()
    };
    let options = PullRequestOptions::default();

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[create_lodash()], &mut Vec::new());

    assert_eq!(report.verdict, RunVerdict::Failed);
    assert!(host.created.borrow().is_empty());
    match &report.events[0].outcome {
        EventOutcome::Failed { message, .. } => assert!(message.contains("dependabot/npm")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn missing_default_branch_fails_creation() {
    let file = config(NPM);
    let host = FakeHost {
        default_branch: None,
        ..FakeHost::default()
    };
    let options = PullRequestOptions::default();

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[create_lodash()], &mut Vec::new());
    assert_eq!(report.verdict, RunVerdict::Failed);
}

#[test]
fn dry_run_writes_nothing() {
    let file = config(NPM);
    let host = FakeHost::default().with_open_pr(
        npm_record(7, &[("lodash", "4.17.20")]),
        "dependabot/npm/lodash-4.17.20",
    );
    let options = PullRequestOptions {
        dry_run: true,
        ..PullRequestOptions::default()
    };
    let mut existing = host.open.clone();
    let close = event(
        "close_pull_request",
        json!({"dependency-names": ["lodash"], "reason": "up_to_date"}),
    );

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[create_single("axios"), update_lodash(), close], &mut existing);

    assert_eq!(report.verdict, RunVerdict::Succeeded);
    assert!(host.created.borrow().is_empty());
    assert!(host.rebased.borrow().is_empty());
    assert!(host.abandoned.borrow().is_empty());
    assert_eq!(existing.len(), 1);
}

#[test]
fn update_rebases_matching_pull_request() {
    let file = config(NPM);
    let host = FakeHost::default().with_open_pr(
        npm_record(7, &[("lodash", "4.17.20")]),
        "dependabot/npm/lodash-4.17.20",
    );
    let options = PullRequestOptions {
        auto_approve: true,
        ..PullRequestOptions::default()
    };
    let approver = FakeHost::default();
    let mut existing = host.open.clone();

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .with_approver(&approver)
        .process(&[update_lodash()], &mut existing);

    assert_eq!(report.updated, vec![7]);
    let rebased = host.rebased.borrow();
    assert_eq!(rebased[0].current_commit, "0123abcd");
    assert_eq!(rebased[0].base_commit_sha, "def456");
    assert_eq!(rebased[0].commit_message, "Update dependency files");
    assert_eq!(*approver.approved.borrow(), vec![7]);
}

#[test]
fn conflicted_pull_request_gets_conflict_commit_message() {
    let file = config(NPM);
    let mut host = FakeHost::default().with_open_pr(
        npm_record(7, &[("lodash", "4.17.20")]),
        "dependabot/npm/lodash-4.17.20",
    );
    if let Some(pr) = host.details.get_mut(&7) {
        pr.merge_status = Some("conflicts".into());
    }
    let options = PullRequestOptions::default();
    let mut existing = host.open.clone();

    Reconciler::new(&host, &file.updates[0], &options).process(&[update_lodash()], &mut existing);
    assert_eq!(host.rebased.borrow()[0].commit_message, "Resolve merge conflicts");
}

#[test]
fn update_skips_draft_edited_and_current_pull_requests() {
    let file = config(NPM);
    let branch = "dependabot/npm/lodash-4.17.20";
    let options = PullRequestOptions::default();

    let mut draft = FakeHost::default().with_open_pr(npm_record(7, &[("lodash", "1")]), branch);
    if let Some(pr) = draft.details.get_mut(&7) {
        pr.is_draft = true;
    }
    let mut edited = FakeHost::default().with_open_pr(npm_record(7, &[("lodash", "1")]), branch);
    edited
        .authors
        .insert(7, vec!["NoReply@GitHub.com".into(), "dev@contoso.com".into()]);
    let mut current = FakeHost::default().with_open_pr(npm_record(7, &[("lodash", "1")]), branch);
    current.behind.insert(branch.into(), 0);

    for host in [&draft, &edited, &current] {
        let mut existing = host.open.clone();
        let report = Reconciler::new(host, &file.updates[0], &options)
            .process(&[update_lodash()], &mut existing);
        assert!(matches!(report.events[0].outcome, EventOutcome::Skipped(_)));
        assert!(host.rebased.borrow().is_empty());
    }
}

#[test]
fn update_without_match_fails() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[update_lodash()], &mut Vec::new());
    assert_eq!(report.verdict, RunVerdict::Failed);
}

#[test]
fn close_comments_abandons_and_forgets() {
    let file = config(NPM);
    let host = FakeHost::default().with_open_pr(
        npm_record(7, &[("lodash", "4.17.20")]),
        "dependabot/npm/lodash-4.17.20",
    );
    let options = PullRequestOptions::default();
    let mut existing = host.open.clone();
    let close = event(
        "close_pull_request",
        json!({"dependency-names": ["lodash"], "reason": "dependency_removed"}),
    );

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .process(&[close.clone(), close], &mut existing);

    assert_eq!(report.closed, vec![7]);
    assert!(existing.is_empty());
    let abandoned = host.abandoned.borrow();
    assert_eq!(abandoned.len(), 1);
    assert!(abandoned[0].delete_source_branch);
    assert!(abandoned[0]
        .comment
        .as_deref()
        .unwrap()
        .contains("lodash is no longer a dependency"));
    // The second close has nothing left to match.
    assert_eq!(report.verdict, RunVerdict::SucceededWithIssues);
}

#[test]
fn superseded_close_has_no_comment() {
    let file = config(NPM);
    let host = FakeHost::default().with_open_pr(
        npm_record(7, &[("lodash", "4.17.20")]),
        "dependabot/npm/lodash-4.17.20",
    );
    let options = PullRequestOptions::default();
    let mut existing = host.open.clone();
    let close = event(
        "close_pull_request",
        json!({"dependency-names": ["lodash"], "reason": "superseded_by"}),
    );

    let report =
        Reconciler::new(&host, &file.updates[0], &options).process(&[close], &mut existing);
    assert_eq!(report.verdict, RunVerdict::Succeeded);
    assert_eq!(host.abandoned.borrow()[0].comment, None);
}

#[test]
fn job_errors_fail_with_payload_and_batch_continues() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let events = vec![
        event(
            "record_update_job_error",
            json!({
                "error-type": "dependency_file_not_found",
                "error-details": {"file-path": "/package.json"},
                "fingerprint": "0f3c"
            }),
        ),
        event("mark_as_processed", json!({"base-commit-sha": "abc"})),
        event("increment_metric", json!({"metric": "updater.started"})),
        event("record_new_thing", json!({})),
        create_lodash(),
    ];

    let report =
        Reconciler::new(&host, &file.updates[0], &options).process(&events, &mut Vec::new());

    assert_eq!(report.verdict, RunVerdict::SucceededWithIssues);
    assert_eq!(report.failures().count(), 1);
    match &report.events[0].outcome {
        EventOutcome::Failed { message, payload } => {
            assert!(message.contains("dependency_file_not_found"));
            assert_eq!(
                payload.as_ref().unwrap()["error-details"]["file-path"],
                "/package.json"
            );
            assert_eq!(payload.as_ref().unwrap()["fingerprint"], "0f3c");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.created.len(), 1);
}

#[test]
fn no_events_is_skipped() {
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let report = Reconciler::new(&host, &file.updates[0], &options).process(&[], &mut Vec::new());
    assert_eq!(report.verdict, RunVerdict::Skipped);
}

#[test]
fn dependency_list_is_snapshotted() {
    let tmp = TempDir::new().unwrap();
    let store = SnapshotStore::new(tmp.path());
    let file = config(NPM);
    let host = FakeHost::default();
    let options = PullRequestOptions::default();
    let list = event(
        "update_dependency_list",
        json!({
            "dependencies": [{"name": "lodash", "version": "4.17.20", "requirements": []}],
            "dependency-files": ["/package.json"]
        }),
    );

    let report = Reconciler::new(&host, &file.updates[0], &options)
        .with_snapshots(&store)
        .process(&[list], &mut Vec::new());

    assert_eq!(report.verdict, RunVerdict::Succeeded);
    let saved = store.load("npm_and_yarn", Some("/")).unwrap().unwrap();
    assert_eq!(saved.dependencies[0].name, "lodash");
}
