//! Azure DevOps Services / Server implementation of [`PullRequestHost`].
//!
//! Repository endpoints live under
//! `{org}/{project}/_apis/git/repositories/{repo}/...`; every request carries
//! `api-version=7.1` and Basic auth built from a personal access token.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use depsync_core::types::PROPERTY_PACKAGE_MANAGER;
use depsync_core::{ExistingPullRequestRecord, PullRequestProperty, RepositorySource};

use crate::error::HostError;
use crate::host::{
    branch_from_ref, ref_from_branch, CommitAuthor, FileChange, FileChangeKind, NewPullRequest,
    PullRequestAbandon, PullRequestDetail, PullRequestHost, PullRequestRebase,
};
use crate::models::{
    BranchStats, ConnectionData, CreatePullRequestBody, CreatedPush, GitCommit, GitPullRequest, GitRef,
    GitRepository, IdentityRef, JsonPatchOperation, LabelRef, ListResponse, PropertiesCollection,
    PushAuthor, PushChange, PushCommit, PushContent, PushItem, PushRequest, RefUpdate,
    ReviewerRef, WorkItemRef,
};
use crate::retry::{RetryPolicy, RetryingSender};
use crate::transport::{HttpRequest, Method, UreqTransport};

pub const API_VERSION: &str = "7.1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const ZERO_OBJECT_ID: &str = "0000000000000000000000000000000000000000";
const JSON: &str = "application/json";
const JSON_PATCH: &str = "application/json-patch+json";
const APPROVE_VOTE: i64 = 10;

pub struct AzureDevOpsClient {
    sender: RetryingSender,
    organization_url: String,
    identity_api_url: String,
    project: String,
    repository: String,
    authorization: String,
    identities: Mutex<HashMap<String, Option<String>>>,
    current_user: Mutex<Option<String>>,
}

impl std::fmt::Debug for AzureDevOpsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureDevOpsClient")
            .field("organization_url", &self.organization_url)
            .field("project", &self.project)
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

impl AzureDevOpsClient {
    pub fn new(
        organization_url: &str,
        project: &str,
        repository: &str,
        access_token: &str,
        sender: RetryingSender,
    ) -> Self {
        let source = RepositorySource::azure_devops(organization_url, project, repository);
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!(":{access_token}"));
        Self {
            sender,
            organization_url: organization_url.trim_end_matches('/').to_string(),
            identity_api_url: identity_api_url(organization_url, &source),
            project: project.to_string(),
            repository: repository.to_string(),
            authorization: format!("Basic {credentials}"),
            identities: Mutex::new(HashMap::new()),
            current_user: Mutex::new(None),
        }
    }

    /// A client over `ureq` with the default retry policy.
    pub fn connect(
        organization_url: &str,
        project: &str,
        repository: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Self {
        let sender = RetryingSender::new(UreqTransport::new(timeout), RetryPolicy::default());
        Self::new(organization_url, project, repository, access_token, sender)
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/_apis/git/repositories/{}{suffix}",
            self.organization_url,
            encode_segment(&self.project),
            encode_segment(&self.repository),
        )
    }

    fn request(&self, method: Method, url: String) -> HttpRequest {
        HttpRequest::new(method, url)
            .query("api-version", API_VERSION)
            .header("Authorization", self.authorization.clone())
            .header("Accept", JSON)
    }

    fn with_body<B: Serialize>(
        request: HttpRequest,
        body: &B,
        content_type: &str,
    ) -> Result<HttpRequest, HostError> {
        Ok(request
            .header("Content-Type", content_type)
            .body(serde_json::to_string(body)?))
    }

    fn fetch<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, HostError> {
        let response = self.sender.send(&request)?;
        Ok(serde_json::from_str(&response.body)?)
    }

    fn execute(&self, request: HttpRequest) -> Result<(), HostError> {
        self.sender.send(&request).map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Fallible operations
    // -----------------------------------------------------------------------

    fn try_default_branch(&self) -> Result<Option<String>, HostError> {
        let repo: GitRepository = self.fetch(self.request(Method::Get, self.repo_url("")))?;
        Ok(repo.default_branch.map(|b| branch_from_ref(&b).to_string()))
    }

    fn try_branch_names(&self) -> Result<Vec<String>, HostError> {
        let refs: ListResponse<GitRef> = self.fetch(
            self.request(Method::Get, self.repo_url("/refs"))
                .query("filter", "heads/"),
        )?;
        Ok(refs
            .value
            .into_iter()
            .map(|r| branch_from_ref(&r.name).to_string())
            .collect())
    }

    fn try_properties(&self, id: i64) -> Result<Vec<PullRequestProperty>, HostError> {
        let props: PropertiesCollection = self.fetch(self.request(
            Method::Get,
            self.repo_url(&format!("/pullRequests/{id}/properties")),
        ))?;
        Ok(props
            .value
            .into_iter()
            .map(|(name, entry)| PullRequestProperty {
                name,
                value: match entry.value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            })
            .collect())
    }

    fn try_active_pull_requests(
        &self,
        created_by: Option<&str>,
    ) -> Result<Vec<ExistingPullRequestRecord>, HostError> {
        let mut request = self
            .request(Method::Get, self.repo_url("/pullrequests"))
            .query("searchCriteria.status", "active");
        if let Some(creator) = created_by {
            request = request.query("searchCriteria.creatorId", creator);
        }
        let prs: ListResponse<GitPullRequest> = self.fetch(request)?;

        let mut records = Vec::new();
        for pr in prs.value {
            let properties = self.try_properties(pr.pull_request_id)?;
            if properties.iter().any(|p| p.name == PROPERTY_PACKAGE_MANAGER) {
                records.push(ExistingPullRequestRecord {
                    id: pr.pull_request_id,
                    properties,
                });
            }
        }
        Ok(records)
    }

    fn try_pull_request(&self, id: i64) -> Result<PullRequestDetail, HostError> {
        let pr: GitPullRequest = self.fetch(
            self.request(Method::Get, self.repo_url(&format!("/pullrequests/{id}"))),
        )?;
        Ok(PullRequestDetail {
            id: pr.pull_request_id,
            title: pr.title,
            is_draft: pr.is_draft,
            source_branch: branch_from_ref(&pr.source_ref_name).to_string(),
            target_branch: branch_from_ref(&pr.target_ref_name).to_string(),
            merge_status: pr.merge_status,
            last_source_commit: pr.last_merge_source_commit.map(|c| c.commit_id),
        })
    }

    fn try_commit_authors(&self, id: i64) -> Result<Vec<String>, HostError> {
        let commits: ListResponse<GitCommit> = self.fetch(self.request(
            Method::Get,
            self.repo_url(&format!("/pullRequests/{id}/commits")),
        ))?;
        Ok(commits
            .value
            .into_iter()
            .filter_map(|c| c.author.and_then(|a| a.email))
            .collect())
    }

    fn try_behind_count(&self, branch: &str, base: &str) -> Result<u64, HostError> {
        let stats: BranchStats = self.fetch(
            self.request(Method::Get, self.repo_url("/stats/branches"))
                .query("name", branch_from_ref(branch))
                .query("baseVersionDescriptor.versionType", "branch")
                .query("baseVersionDescriptor.version", branch_from_ref(base)),
        )?;
        Ok(stats.behind_count)
    }

    fn try_current_user_id(&self) -> Result<String, HostError> {
        let data: ConnectionData = self.fetch(self.request(
            Method::Get,
            format!("{}/_apis/connectionData", self.organization_url),
        ))?;
        Ok(data.authenticated_user.id)
    }

    fn try_resolve_identity(&self, email_or_name: &str) -> Result<Option<String>, HostError> {
        let found: ListResponse<IdentityRef> = self.fetch(
            self.request(Method::Get, format!("{}/_apis/identities", self.identity_api_url))
                .query("searchFilter", "General")
                .query("filterValue", email_or_name)
                .query("queryMembership", "None"),
        )?;
        Ok(found.value.into_iter().next().map(|i| i.id))
    }

    fn push(
        &self,
        branch: &str,
        old_object_id: &str,
        message: &str,
        author: Option<&CommitAuthor>,
        changes: &[FileChange],
    ) -> Result<Option<String>, HostError> {
        let body = PushRequest {
            ref_updates: vec![RefUpdate {
                name: ref_from_branch(branch),
                old_object_id: old_object_id.to_string(),
                new_object_id: None,
            }],
            commits: vec![PushCommit {
                comment: message.to_string(),
                author: author.map(|a| PushAuthor {
                    name: a.name.clone(),
                    email: a.email.clone(),
                }),
                changes: changes.iter().map(push_change).collect(),
            }],
        };
        let response = self.sender.send(&Self::with_body(
            self.request(Method::Post, self.repo_url("/pushes")),
            &body,
            JSON,
        )?)?;
        // The new commit id is only needed to roll the branch back.
        Ok(serde_json::from_str::<CreatedPush>(&response.body)
            .ok()
            .and_then(|push| push.ref_updates.into_iter().find_map(|r| r.new_object_id)))
    }

    fn update_ref(&self, branch: &str, old_object_id: &str, new_object_id: &str) -> Result<(), HostError> {
        let body = vec![RefUpdate {
            name: ref_from_branch(branch),
            old_object_id: old_object_id.to_string(),
            new_object_id: Some(new_object_id.to_string()),
        }];
        let result: ListResponse<Value> = self.fetch(Self::with_body(
            self.request(Method::Post, self.repo_url("/refs")),
            &body,
            JSON,
        )?)?;
        let failed = result
            .value
            .iter()
            .find(|r| r.get("success").and_then(Value::as_bool) == Some(false));
        match failed {
            Some(update) => Err(HostError::Api {
                status: 409,
                message: format!(
                    "ref update for {branch} rejected: {}",
                    update.get("updateStatus").and_then(Value::as_str).unwrap_or("unknown")
                ),
            }),
            None => Ok(()),
        }
    }

    fn resolve_all(&self, people: &[String], required: bool) -> Vec<ReviewerRef> {
        people
            .iter()
            .filter_map(|person| {
                let id = self.resolve_identity(person);
                if id.is_none() {
                    tracing::warn!("no identity found for {person}; not adding as reviewer");
                }
                id
            })
            .map(|id| ReviewerRef {
                id,
                is_required: required,
            })
            .collect()
    }

    fn try_create_pull_request(&self, request: &NewPullRequest) -> Result<i64, HostError> {
        let mut reviewers = self.resolve_all(&request.assignees, true);
        reviewers.extend(self.resolve_all(&request.reviewers, false));

        let pushed = self.push(
            &request.source_branch,
            &request.base_commit_sha,
            &request.commit_message,
            request.author.as_ref(),
            &request.changes,
        )?;

        let body = CreatePullRequestBody {
            source_ref_name: ref_from_branch(&request.source_branch),
            target_ref_name: ref_from_branch(&request.target_branch),
            title: request.title.clone(),
            description: request.description.clone(),
            reviewers,
            work_item_refs: request
                .work_item
                .iter()
                .map(|id| WorkItemRef { id: id.clone() })
                .collect(),
            labels: request
                .labels
                .iter()
                .map(|name| LabelRef { name: name.clone() })
                .collect(),
        };
        let created = Self::with_body(
            self.request(Method::Post, self.repo_url("/pullrequests")),
            &body,
            JSON,
        )
        .and_then(|req| self.fetch::<GitPullRequest>(req));
        let id = match created {
            Ok(created) => created.pull_request_id,
            Err(e) => {
                self.discard_partial(None, &request.source_branch, pushed.as_deref());
                return Err(e);
            }
        };

        if let Err(e) = self.finish_pull_request(id, request) {
            self.discard_partial(Some(id), &request.source_branch, pushed.as_deref());
            return Err(e);
        }
        Ok(id)
    }

    /// Properties and auto-complete for a freshly opened pull request.
    fn finish_pull_request(&self, id: i64, request: &NewPullRequest) -> Result<(), HostError> {
        if !request.properties.is_empty() {
            let patch: Vec<JsonPatchOperation> = request
                .properties
                .iter()
                .map(|p| JsonPatchOperation {
                    op: "add",
                    path: format!("/{}", p.name),
                    value: Value::String(p.value.clone()),
                })
                .collect();
            self.execute(Self::with_body(
                self.request(Method::Patch, self.repo_url(&format!("/pullRequests/{id}/properties"))),
                &patch,
                JSON_PATCH,
            )?)?;
        }

        if let Some(auto_complete) = &request.auto_complete {
            let user_id = self.cached_current_user_id()?;
            let body = json!({
                "autoCompleteSetBy": { "id": user_id },
                "completionOptions": {
                    "mergeStrategy": auto_complete.merge_strategy.as_str(),
                    "deleteSourceBranch": auto_complete.delete_source_branch,
                    "transitionWorkItems": false,
                    "autoCompleteIgnoreConfigIds": auto_complete.ignore_config_ids,
                }
            });
            self.execute(Self::with_body(
                self.request(Method::Patch, self.repo_url(&format!("/pullrequests/{id}"))),
                &body,
                JSON,
            )?)?;
        }
        Ok(())
    }

    /// Abandons a half-created pull request and deletes its pushed branch.
    /// Rollback failures are logged; the original error is what the caller sees.
    fn discard_partial(&self, id: Option<i64>, branch: &str, pushed_commit: Option<&str>) {
        if let Some(id) = id {
            let abandoned = Self::with_body(
                self.request(Method::Patch, self.repo_url(&format!("/pullrequests/{id}"))),
                &json!({ "status": "abandoned" }),
                JSON,
            )
            .and_then(|req| self.execute(req));
            match abandoned {
                Ok(()) => tracing::info!(pr = id, "abandoned incomplete pull request"),
                Err(e) => tracing::warn!(pr = id, "failed to abandon incomplete pull request: {e}"),
            }
        }
        match pushed_commit {
            Some(commit) => {
                if let Err(e) = self.update_ref(branch, commit, ZERO_OBJECT_ID) {
                    tracing::warn!(branch, "failed to delete pushed branch: {e}");
                }
            }
            None => tracing::warn!(branch, "pushed commit unknown; branch left in place"),
        }
    }

    fn try_update_pull_request(&self, rebase: &PullRequestRebase) -> Result<(), HostError> {
        self.update_ref(&rebase.source_branch, &rebase.current_commit, &rebase.base_commit_sha)?;
        self.push(
            &rebase.source_branch,
            &rebase.base_commit_sha,
            &rebase.commit_message,
            rebase.author.as_ref(),
            &rebase.changes,
        )
        .map(|_| ())
    }

    fn try_abandon_pull_request(&self, abandon: &PullRequestAbandon) -> Result<(), HostError> {
        let id = abandon.pull_request_id;
        let detail = self.try_pull_request(id)?;

        if let Some(comment) = &abandon.comment {
            let thread = json!({
                "status": "closed",
                "comments": [{ "content": comment, "commentType": "text" }],
            });
            self.execute(Self::with_body(
                self.request(Method::Post, self.repo_url(&format!("/pullRequests/{id}/threads"))),
                &thread,
                JSON,
            )?)?;
        }

        self.execute(Self::with_body(
            self.request(Method::Patch, self.repo_url(&format!("/pullrequests/{id}"))),
            &json!({ "status": "abandoned" }),
            JSON,
        )?)?;

        if abandon.delete_source_branch {
            match &detail.last_source_commit {
                Some(commit) => self.update_ref(&detail.source_branch, commit, ZERO_OBJECT_ID)?,
                None => tracing::warn!(
                    pr = id,
                    "source commit unknown; branch {} left in place",
                    detail.source_branch
                ),
            }
        }
        Ok(())
    }

    fn try_approve(&self, id: i64) -> Result<(), HostError> {
        let user_id = self.cached_current_user_id()?;
        let url = self.repo_url(&format!("/pullRequests/{id}/reviewers/{user_id}"));
        let existing: Result<Value, HostError> = self.fetch(self.request(Method::Get, url.clone()));
        if let Ok(reviewer) = existing {
            if reviewer.get("vote").and_then(Value::as_i64) == Some(APPROVE_VOTE) {
                tracing::debug!(pr = id, "already approved");
                return Ok(());
            }
        }
        self.execute(Self::with_body(
            self.request(Method::Put, url),
            &json!({ "vote": APPROVE_VOTE }),
            JSON,
        )?)
    }

    fn cached_current_user_id(&self) -> Result<String, HostError> {
        let mut cached = self
            .current_user
            .lock()
            .map_err(|_| HostError::Transport("current user cache poisoned".to_string()))?;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let id = self.try_current_user_id()?;
        *cached = Some(id.clone());
        Ok(id)
    }
}

impl PullRequestHost for AzureDevOpsClient {
    fn provider_name(&self) -> &'static str {
        "azure"
    }

    fn default_branch(&self) -> Option<String> {
        self.try_default_branch()
            .unwrap_or_else(|e| {
                tracing::warn!("failed to read default branch: {e}");
                None
            })
    }

    fn branch_names(&self) -> Vec<String> {
        self.try_branch_names().unwrap_or_else(|e| {
            tracing::warn!("failed to list branches: {e}");
            Vec::new()
        })
    }

    fn active_pull_requests(&self, created_by: Option<&str>) -> Vec<ExistingPullRequestRecord> {
        self.try_active_pull_requests(created_by).unwrap_or_else(|e| {
            tracing::warn!("failed to list active pull requests: {e}");
            Vec::new()
        })
    }

    fn pull_request(&self, id: i64) -> Option<PullRequestDetail> {
        self.try_pull_request(id)
            .map_err(|e| tracing::warn!(pr = id, "failed to read pull request: {e}"))
            .ok()
    }

    fn pull_request_commit_authors(&self, id: i64) -> Option<Vec<String>> {
        self.try_commit_authors(id)
            .map_err(|e| tracing::warn!(pr = id, "failed to list pull request commits: {e}"))
            .ok()
    }

    fn branch_behind_count(&self, branch: &str, base: &str) -> Option<u64> {
        self.try_behind_count(branch, base)
            .map_err(|e| tracing::warn!("failed to compare {branch} with {base}: {e}"))
            .ok()
    }

    fn create_pull_request(&self, request: &NewPullRequest) -> Option<i64> {
        match self.try_create_pull_request(request) {
            Ok(id) => {
                tracing::info!(pr = id, branch = %request.source_branch, "created pull request");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(branch = %request.source_branch, "failed to create pull request: {e}");
                None
            }
        }
    }

    fn update_pull_request(&self, rebase: &PullRequestRebase) -> bool {
        match self.try_update_pull_request(rebase) {
            Ok(()) => {
                tracing::info!(pr = rebase.pull_request_id, "updated pull request");
                true
            }
            Err(e) => {
                tracing::warn!(pr = rebase.pull_request_id, "failed to update pull request: {e}");
                false
            }
        }
    }

    fn abandon_pull_request(&self, abandon: &PullRequestAbandon) -> bool {
        match self.try_abandon_pull_request(abandon) {
            Ok(()) => {
                tracing::info!(pr = abandon.pull_request_id, "abandoned pull request");
                true
            }
            Err(e) => {
                tracing::warn!(pr = abandon.pull_request_id, "failed to abandon pull request: {e}");
                false
            }
        }
    }

    fn approve_pull_request(&self, id: i64) -> bool {
        self.try_approve(id)
            .map_err(|e| tracing::warn!(pr = id, "failed to approve pull request: {e}"))
            .is_ok()
    }

    fn current_user_id(&self) -> Option<String> {
        self.cached_current_user_id()
            .map_err(|e| tracing::warn!("failed to read authenticated user: {e}"))
            .ok()
    }

    fn resolve_identity(&self, email_or_name: &str) -> Option<String> {
        let key = email_or_name.trim().to_ascii_lowercase();
        if let Ok(cache) = self.identities.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }
        let resolved = self.try_resolve_identity(email_or_name).unwrap_or_else(|e| {
            tracing::warn!("identity lookup for {email_or_name} failed: {e}");
            None
        });
        if let Ok(mut cache) = self.identities.lock() {
            cache.entry(key).or_insert_with(|| resolved.clone());
        }
        resolved
    }
}

fn push_change(change: &FileChange) -> PushChange {
    let new_content = match change.kind {
        FileChangeKind::Delete => None,
        FileChangeKind::Add | FileChangeKind::Edit => Some(PushContent {
            content: base64::engine::general_purpose::STANDARD.encode(&change.content),
            content_type: "base64encoded",
        }),
    };
    PushChange {
        change_type: change.kind.as_str(),
        item: PushItem {
            path: change.path.clone(),
        },
        new_content,
    }
}

/// Identities live on the `vssps` host for cloud organizations and on the
/// collection URL for servers.
fn identity_api_url(organization_url: &str, source: &RepositorySource) -> String {
    if source.hostname == "dev.azure.com" {
        format!("https://vssps.dev.azure.com/{}", source.organization)
    } else if let Some(org) = source.hostname.strip_suffix(".visualstudio.com") {
        format!("https://{org}.vssps.visualstudio.com")
    } else {
        organization_url.trim_end_matches('/').to_string()
    }
}

fn encode_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(' ', "%20")
}
