//! Azure DevOps client against a recording in-memory transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depsync_core::types::{PROPERTY_DEPENDENCIES, PROPERTY_PACKAGE_MANAGER};
use depsync_core::PullRequestProperty;
use depsync_host::{
    AutoComplete, AzureDevOpsClient, FileChange, FileChangeKind, HostError, HttpRequest,
    HttpResponse, Method, NewPullRequest, PullRequestAbandon, PullRequestHost,
    PullRequestRebase, RetryPolicy, RetryingSender, Transport,
};
use serde_json::{json, Value};

type Route = (Method, &'static str, u16, Value);

/// Answers each request with the first unused route whose method matches and
/// whose pattern is a suffix of the URL path; unmatched requests get a 404.
#[derive(Clone, Default)]
struct FakeAzure {
    routes: Arc<Mutex<VecDeque<Route>>>,
    log: Arc<Mutex<Vec<HttpRequest>>>,
}

impl FakeAzure {
    fn route(self, method: Method, path_suffix: &'static str, status: u16, body: Value) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push_back((method, path_suffix, status, body));
        self
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    fn client(&self) -> AzureDevOpsClient {
        let sender = RetryingSender::new(
            self.clone(),
            RetryPolicy {
                max_retries: 3,
                delay: Duration::from_secs(3),
            },
        )
        .with_sleeper(|_| {});
        AzureDevOpsClient::new("https://dev.azure.com/contoso/", "web", "site", "pat", sender)
    }
}

impl Transport for FakeAzure {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HostError> {
        self.log.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        let position = routes
            .iter()
            .position(|(m, suffix, _, _)| *m == request.method && request.url.ends_with(suffix));
        Ok(match position.and_then(|i| routes.remove(i)) {
            Some((_, _, status, body)) => HttpResponse {
                status,
                body: body.to_string(),
            },
            None => HttpResponse {
                status: 404,
                body: r#"{"message":"not found"}"#.to_string(),
            },
        })
    }
}

fn new_pull_request() -> NewPullRequest {
    NewPullRequest {
        source_branch: "dependabot/npm_and_yarn/lodash-4.17.21".into(),
        target_branch: "main".into(),
        base_commit_sha: "1a2b3c".into(),
        author: None,
        title: "Bump lodash from 4.17.20 to 4.17.21".into(),
        description: "Bumps lodash.".into(),
        commit_message: "Bump lodash from 4.17.20 to 4.17.21".into(),
        changes: vec![FileChange {
            kind: FileChangeKind::Edit,
            path: "/package.json".into(),
            content: b"{}".to_vec(),
        }],
        properties: vec![
            PullRequestProperty {
                name: PROPERTY_PACKAGE_MANAGER.into(),
                value: "npm_and_yarn".into(),
            },
            PullRequestProperty {
                name: PROPERTY_DEPENDENCIES.into(),
                value: r#"[{"dependency-name":"lodash","dependency-version":"4.17.21"}]"#.into(),
            },
        ],
        reviewers: vec!["dev@contoso.com".into()],
        assignees: vec![],
        labels: vec!["dependencies".into()],
        work_item: None,
        auto_complete: None,
    }
}

#[test]
fn every_request_carries_api_version_and_basic_auth() {
    let fake = FakeAzure::default().route(
        Method::Get,
        "/repositories/site",
        200,
        json!({"id": "r1", "defaultBranch": "refs/heads/main"}),
    );
    let client = fake.client();
    assert_eq!(client.default_branch().as_deref(), Some("main"));

    let request = &fake.requests()[0];
    assert_eq!(
        request.url,
        "https://dev.azure.com/contoso/web/_apis/git/repositories/site"
    );
    assert_eq!(request.query_value("api-version"), Some("7.1"));
    let auth = request
        .headers
        .iter()
        .find(|(k, _)| k == "Authorization")
        .map(|(_, v)| v.as_str());
    // base64(":pat")
    assert_eq!(auth, Some("Basic OnBhdA=="));
}

#[test]
fn reads_degrade_to_empty_on_failure() {
    let fake = FakeAzure::default();
    let client = fake.client();
    assert!(client.default_branch().is_none());
    assert!(client.branch_names().is_empty());
    assert!(client.active_pull_requests(None).is_empty());
    assert!(client.pull_request(7).is_none());
}

#[test]
fn transient_failures_are_retried_transparently() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/refs", 503, json!({"message": "unavailable"}))
        .route(Method::Get, "/refs", 504, json!({"message": "gateway"}))
        .route(
            Method::Get,
            "/refs",
            200,
            json!({"count": 2, "value": [{"name": "refs/heads/main"}, {"name": "refs/heads/dependabot/nuget/x-1.0.0"}]}),
        );
    let client = fake.client();
    assert_eq!(client.branch_names(), vec!["main", "dependabot/nuget/x-1.0.0"]);
    assert_eq!(fake.requests().len(), 3);
}

#[test]
fn active_pull_requests_keep_only_managed_ones() {
    let fake = FakeAzure::default()
        .route(
            Method::Get,
            "/pullrequests",
            200,
            json!({"value": [
                {"pullRequestId": 1, "sourceRefName": "refs/heads/a", "targetRefName": "refs/heads/main"},
                {"pullRequestId": 2, "sourceRefName": "refs/heads/b", "targetRefName": "refs/heads/main"}
            ]}),
        )
        .route(
            Method::Get,
            "/pullRequests/1/properties",
            200,
            json!({"count": 2, "value": {
                "Dependabot.PackageManager": {"$type": "System.String", "$value": "nuget"},
                "Dependabot.Dependencies": {"$type": "System.String", "$value": "[{\"dependency-name\":\"Serilog\"}]"}
            }}),
        )
        .route(Method::Get, "/pullRequests/2/properties", 200, json!({"count": 0, "value": {}}));
    let client = fake.client();

    let records = client.active_pull_requests(Some("bot-id"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, 1);
    assert_eq!(records[0].package_manager(), Some("nuget"));
    assert_eq!(
        fake.requests()[0].query_value("searchCriteria.creatorId"),
        Some("bot-id")
    );
}

#[test]
fn create_pushes_then_opens_then_tags() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/_apis/identities", 200, json!({"value": [{"id": "u-dev"}]}))
        .route(Method::Post, "/pushes", 201, json!({"refUpdates": []}))
        .route(
            Method::Post,
            "/pullrequests",
            201,
            json!({"pullRequestId": 42, "sourceRefName": "refs/heads/x", "targetRefName": "refs/heads/main"}),
        )
        .route(Method::Patch, "/pullRequests/42/properties", 200, json!({}))
        .route(Method::Get, "/_apis/connectionData", 200, json!({"authenticatedUser": {"id": "bot"}}))
        .route(Method::Patch, "/pullrequests/42", 200, json!({}));
    let client = fake.client();

    let mut request = new_pull_request();
    request.auto_complete = Some(AutoComplete {
        ignore_config_ids: vec![3],
        delete_source_branch: true,
        ..Default::default()
    });
    assert_eq!(client.create_pull_request(&request), Some(42));

    let requests = fake.requests();
    let identity = &requests[0];
    assert!(identity.url.starts_with("https://vssps.dev.azure.com/contoso/"));
    assert_eq!(identity.query_value("filterValue"), Some("dev@contoso.com"));

    let push: Value = serde_json::from_str(requests[1].body.as_deref().unwrap()).unwrap();
    assert_eq!(
        push["refUpdates"][0]["name"],
        "refs/heads/dependabot/npm_and_yarn/lodash-4.17.21"
    );
    assert_eq!(push["refUpdates"][0]["oldObjectId"], "1a2b3c");
    assert_eq!(push["commits"][0]["changes"][0]["changeType"], "edit");
    assert_eq!(push["commits"][0]["changes"][0]["newContent"]["content"], "e30=");
    assert_eq!(
        push["commits"][0]["changes"][0]["newContent"]["contentType"],
        "base64encoded"
    );

    let pr: Value = serde_json::from_str(requests[2].body.as_deref().unwrap()).unwrap();
    assert_eq!(pr["targetRefName"], "refs/heads/main");
    assert_eq!(pr["reviewers"][0], json!({"id": "u-dev", "isRequired": false}));
    assert_eq!(pr["labels"][0]["name"], "dependencies");

    let props: Value = serde_json::from_str(requests[3].body.as_deref().unwrap()).unwrap();
    assert_eq!(props[0]["op"], "add");
    assert_eq!(props[0]["path"], "/Dependabot.PackageManager");
    assert_eq!(props[0]["value"], "npm_and_yarn");
    assert!(requests[3]
        .headers
        .iter()
        .any(|(k, v)| k == "Content-Type" && v == "application/json-patch+json"));

    let auto: Value = serde_json::from_str(requests[5].body.as_deref().unwrap()).unwrap();
    assert_eq!(auto["autoCompleteSetBy"]["id"], "bot");
    assert_eq!(auto["completionOptions"]["mergeStrategy"], "squash");
    assert_eq!(auto["completionOptions"]["autoCompleteIgnoreConfigIds"], json!([3]));
}

#[test]
fn create_aborts_when_push_is_rejected() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/_apis/identities", 200, json!({"value": []}))
        .route(Method::Post, "/pushes", 409, json!({"message": "TF401028: ref already updated"}));
    let client = fake.client();
    assert_eq!(client.create_pull_request(&new_pull_request()), None);
    assert!(
        !fake.requests().iter().any(|r| r.url.ends_with("/pullrequests")),
        "no pull request may be opened without its branch"
    );
}

#[test]
fn create_abandons_pull_request_when_properties_are_rejected() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/_apis/identities", 200, json!({"value": []}))
        .route(
            Method::Post,
            "/pushes",
            201,
            json!({"refUpdates": [{"name": "refs/heads/dependabot/npm_and_yarn/lodash-4.17.21", "newObjectId": "c0ffee"}]}),
        )
        .route(Method::Post, "/pullrequests", 201, json!({
            "pullRequestId": 42,
            "sourceRefName": "refs/heads/dependabot/npm_and_yarn/lodash-4.17.21",
            "targetRefName": "refs/heads/main"
        }))
        .route(Method::Patch, "/pullRequests/42/properties", 400, json!({"message": "bad patch"}))
        .route(Method::Patch, "/pullrequests/42", 200, json!({}))
        .route(Method::Post, "/refs", 200, json!({"value": [{"success": true}]}));
    let client = fake.client();

    assert_eq!(client.create_pull_request(&new_pull_request()), None);

    let requests = fake.requests();
    let abandon = requests
        .iter()
        .find(|r| r.method == Method::Patch && r.url.ends_with("/pullrequests/42"))
        .expect("incomplete pull request must be abandoned");
    let body: Value = serde_json::from_str(abandon.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["status"], "abandoned");

    let delete = requests
        .iter()
        .find(|r| r.method == Method::Post && r.url.ends_with("/refs"))
        .expect("pushed branch must be deleted");
    let body: Value = serde_json::from_str(delete.body.as_deref().unwrap()).unwrap();
    assert_eq!(body[0]["oldObjectId"], "c0ffee");
    assert_eq!(body[0]["newObjectId"], "0000000000000000000000000000000000000000");
}

#[test]
fn create_deletes_branch_when_pull_request_is_refused() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/_apis/identities", 200, json!({"value": []}))
        .route(
            Method::Post,
            "/pushes",
            201,
            json!({"refUpdates": [{"newObjectId": "c0ffee"}]}),
        )
        .route(Method::Post, "/pullrequests", 400, json!({"message": "TF401179: active pull request exists"}))
        .route(Method::Post, "/refs", 200, json!({"value": [{"success": true}]}));
    let client = fake.client();

    assert_eq!(client.create_pull_request(&new_pull_request()), None);
    let requests = fake.requests();
    assert!(!requests.iter().any(|r| r.method == Method::Patch));
    assert!(requests.iter().any(|r| r.method == Method::Post && r.url.ends_with("/refs")));
}

#[test]
fn identity_misses_are_cached() {
    let fake = FakeAzure::default().route(Method::Get, "/_apis/identities", 200, json!({"value": []}));
    let client = fake.client();
    assert!(client.resolve_identity("ghost@contoso.com").is_none());
    assert!(client.resolve_identity("Ghost@Contoso.com").is_none());
    assert_eq!(fake.requests().len(), 1);
}

#[test]
fn rebase_resets_ref_then_pushes() {
    let fake = FakeAzure::default()
        .route(Method::Post, "/refs", 200, json!({"value": [{"success": true}]}))
        .route(Method::Post, "/pushes", 201, json!({}));
    let client = fake.client();
    let ok = client.update_pull_request(&PullRequestRebase {
        pull_request_id: 5,
        source_branch: "dependabot/npm_and_yarn/lodash-4.17.21".into(),
        current_commit: "old".into(),
        base_commit_sha: "new".into(),
        author: None,
        commit_message: "Update dependency files".into(),
        changes: vec![],
    });
    assert!(ok);

    let requests = fake.requests();
    let reset: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(reset[0]["oldObjectId"], "old");
    assert_eq!(reset[0]["newObjectId"], "new");
    let push: Value = serde_json::from_str(requests[1].body.as_deref().unwrap()).unwrap();
    assert_eq!(push["refUpdates"][0]["oldObjectId"], "new");
    assert_eq!(push["commits"][0]["comment"], "Update dependency files");
}

#[test]
fn rejected_ref_reset_fails_the_update() {
    let fake = FakeAzure::default().route(
        Method::Post,
        "/refs",
        200,
        json!({"value": [{"success": false, "updateStatus": "staleOldObjectId"}]}),
    );
    let client = fake.client();
    let ok = client.update_pull_request(&PullRequestRebase {
        pull_request_id: 5,
        source_branch: "b".into(),
        current_commit: "old".into(),
        base_commit_sha: "new".into(),
        author: None,
        commit_message: "Update dependency files".into(),
        changes: vec![],
    });
    assert!(!ok);
    assert_eq!(fake.requests().len(), 1, "nothing is pushed after a failed reset");
}

#[test]
fn abandon_comments_closes_and_deletes_branch() {
    let fake = FakeAzure::default()
        .route(
            Method::Get,
            "/pullrequests/9",
            200,
            json!({
                "pullRequestId": 9,
                "sourceRefName": "refs/heads/dependabot/nuget/x-1.0.0",
                "targetRefName": "refs/heads/main",
                "lastMergeSourceCommit": {"commitId": "abc"}
            }),
        )
        .route(Method::Post, "/pullRequests/9/threads", 200, json!({}))
        .route(Method::Patch, "/pullrequests/9", 200, json!({}))
        .route(Method::Post, "/refs", 200, json!({"value": [{"success": true}]}));
    let client = fake.client();
    assert!(client.abandon_pull_request(&PullRequestAbandon {
        pull_request_id: 9,
        comment: Some("Looks like x is up-to-date now".into()),
        delete_source_branch: true,
    }));

    let requests = fake.requests();
    assert_eq!(requests.len(), 4);
    let status: Value = serde_json::from_str(requests[2].body.as_deref().unwrap()).unwrap();
    assert_eq!(status["status"], "abandoned");
    let delete: Value = serde_json::from_str(requests[3].body.as_deref().unwrap()).unwrap();
    assert_eq!(delete[0]["name"], "refs/heads/dependabot/nuget/x-1.0.0");
    assert_eq!(delete[0]["newObjectId"], "0000000000000000000000000000000000000000");
}

#[test]
fn approval_is_skipped_when_already_voted() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/_apis/connectionData", 200, json!({"authenticatedUser": {"id": "approver"}}))
        .route(Method::Get, "/pullRequests/3/reviewers/approver", 200, json!({"id": "approver", "vote": 10}));
    let client = fake.client();
    assert!(client.approve_pull_request(3));
    assert!(fake.requests().iter().all(|r| r.method != Method::Put));
}

#[test]
fn approval_casts_vote() {
    let fake = FakeAzure::default()
        .route(Method::Get, "/_apis/connectionData", 200, json!({"authenticatedUser": {"id": "approver"}}))
        .route(Method::Put, "/pullRequests/3/reviewers/approver", 200, json!({"vote": 10}));
    let client = fake.client();
    assert!(client.approve_pull_request(3));
    let put = fake
        .requests()
        .into_iter()
        .find(|r| r.method == Method::Put)
        .expect("vote request");
    assert_eq!(put.body.as_deref(), Some(r#"{"vote":10}"#));
}

#[test]
fn commit_authors_and_behind_count() {
    let fake = FakeAzure::default()
        .route(
            Method::Get,
            "/pullRequests/4/commits",
            200,
            json!({"value": [{"author": {"name": "bot", "email": "bot@contoso.com"}}, {"author": {"email": "dev@contoso.com"}}]}),
        )
        .route(Method::Get, "/stats/branches", 200, json!({"aheadCount": 1, "behindCount": 3}));
    let client = fake.client();
    assert_eq!(
        client.pull_request_commit_authors(4),
        Some(vec!["bot@contoso.com".to_string(), "dev@contoso.com".to_string()])
    );
    assert_eq!(client.branch_behind_count("refs/heads/feature", "main"), Some(3));
    let stats = &fake.requests()[1];
    assert_eq!(stats.query_value("name"), Some("feature"));
    assert_eq!(stats.query_value("baseVersionDescriptor.version"), Some("main"));
}
