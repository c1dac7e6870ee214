//! Azure DevOps REST shapes (camelCase on the wire). Only the fields read
//! or written by the client are modelled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `{count, value: [...]}` envelope of list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub id: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRef {
    pub name: String,
    #[serde(default)]
    pub object_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRef {
    pub commit_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitPullRequest {
    pub pull_request_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
    pub source_ref_name: String,
    pub target_ref_name: String,
    #[serde(default)]
    pub merge_status: Option<String>,
    #[serde(default)]
    pub last_merge_source_commit: Option<CommitRef>,
}

/// One entry of the properties bag: `{"$type": ..., "$value": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyValue {
    #[serde(rename = "$value")]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesCollection {
    #[serde(default)]
    pub value: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitUserDate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitCommit {
    #[serde(default)]
    pub author: Option<GitUserDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStats {
    #[serde(default)]
    pub ahead_count: u64,
    #[serde(default)]
    pub behind_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub authenticated_user: IdentityRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPush {
    #[serde(default)]
    pub ref_updates: Vec<PushedRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedRef {
    #[serde(default)]
    pub new_object_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdate {
    pub name: String,
    pub old_object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_object_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub ref_updates: Vec<RefUpdate>,
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushCommit {
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<PushAuthor>,
    pub changes: Vec<PushChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushChange {
    pub change_type: &'static str,
    pub item: PushItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_content: Option<PushContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushItem {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushContent {
    pub content: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerRef {
    pub id: String,
    pub is_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkItemRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequestBody {
    pub source_ref_name: String,
    pub target_ref_name: String,
    pub title: String,
    pub description: String,
    pub reviewers: Vec<ReviewerRef>,
    pub work_item_refs: Vec<WorkItemRef>,
    pub labels: Vec<LabelRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonPatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}
