//! Engine output: a typed, ordered stream of events.
//!
//! The output file is YAML of the form
//!
//! ```text
//! output:
//!   - type: create_pull_request
//!     expect:
//!       data: { ... }
//! ```
//!
//! Each entry is validated against the schema for its type when parsed.
//! Unrecognised types are kept as [`OutputEvent::Unknown`] so newer engines
//! keep working.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use depsync_core::{DependencyIdentity, DependencyRef};

use crate::error::{io_err, EngineError};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One record from the engine's output, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    UpdateDependencyList(DependencyListSnapshot),
    CreatePullRequest(CreatePullRequest),
    UpdatePullRequest(UpdatePullRequest),
    ClosePullRequest(ClosePullRequest),
    MarkAsProcessed(Value),
    RecordEcosystemVersions(Value),
    RecordEcosystemMeta(Value),
    IncrementMetric(Value),
    RecordUpdateJobError(JobErrorReport),
    RecordUpdateJobUnknownError(JobErrorReport),
    Unknown { kind: String, data: Value },
}

impl OutputEvent {
    /// Parse a raw `{type, data}` pair against the schema for `kind`.
    pub fn from_raw(kind: &str, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            "update_dependency_list" => Self::UpdateDependencyList(serde_json::from_value(data)?),
            "create_pull_request" => Self::CreatePullRequest(serde_json::from_value(data)?),
            "update_pull_request" => Self::UpdatePullRequest(serde_json::from_value(data)?),
            "close_pull_request" => Self::ClosePullRequest(serde_json::from_value(data)?),
            "mark_as_processed" => Self::MarkAsProcessed(data),
            "record_ecosystem_versions" => Self::RecordEcosystemVersions(data),
            "record_ecosystem_meta" => Self::RecordEcosystemMeta(data),
            "increment_metric" => Self::IncrementMetric(data),
            "record_update_job_error" => Self::RecordUpdateJobError(JobErrorReport::from_value(data)?),
            "record_update_job_unknown_error" => {
                Self::RecordUpdateJobUnknownError(JobErrorReport::from_value(data)?)
            }
            other => Self::Unknown {
                kind: other.to_string(),
                data,
            },
        })
    }

    /// The wire name of this event's type.
    pub fn kind(&self) -> &str {
        match self {
            Self::UpdateDependencyList(_) => "update_dependency_list",
            Self::CreatePullRequest(_) => "create_pull_request",
            Self::UpdatePullRequest(_) => "update_pull_request",
            Self::ClosePullRequest(_) => "close_pull_request",
            Self::MarkAsProcessed(_) => "mark_as_processed",
            Self::RecordEcosystemVersions(_) => "record_ecosystem_versions",
            Self::RecordEcosystemMeta(_) => "record_ecosystem_meta",
            Self::IncrementMetric(_) => "increment_metric",
            Self::RecordUpdateJobError(_) => "record_update_job_error",
            Self::RecordUpdateJobUnknownError(_) => "record_update_job_unknown_error",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyListSnapshot {
    #[serde(default)]
    pub dependencies: Vec<ListedDependency>,
    #[serde(default)]
    pub dependency_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub requirements: Vec<Value>,
}

/// A dependency changed by a create/update event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangedDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub previous_version: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl ChangedDependency {
    pub fn to_dependency_ref(&self) -> DependencyRef {
        DependencyRef {
            dependency_name: self.name.clone(),
            dependency_version: self.version.clone(),
            directory: self.directory.clone(),
            removed: self.removed,
        }
    }
}

/// How a file is changed in the pushed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Edit,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyFile {
    #[serde(default)]
    pub directory: String,
    pub name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_encoding: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub operation: Option<String>,
}

impl DependencyFile {
    /// Repository path with a single leading `/`.
    pub fn path(&self) -> String {
        let dir = self.directory.trim_matches('/');
        let name = self.name.trim_start_matches('/');
        if dir.is_empty() {
            format!("/{name}")
        } else {
            format!("/{dir}/{name}")
        }
    }

    pub fn change_kind(&self) -> ChangeKind {
        match self.operation.as_deref() {
            _ if self.deleted => ChangeKind::Delete,
            Some("delete") => ChangeKind::Delete,
            Some("create") => ChangeKind::Add,
            _ => ChangeKind::Edit,
        }
    }

    pub fn is_base64(&self) -> bool {
        self.content_encoding.as_deref() == Some("base64")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGroupRef {
    pub name: String,
}

/// The dependency change set for a new pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreatePullRequest {
    pub base_commit_sha: String,
    pub dependencies: Vec<ChangedDependency>,
    #[serde(default)]
    pub updated_dependency_files: Vec<DependencyFile>,
    pub pr_title: String,
    #[serde(default)]
    pub pr_body: Option<String>,
    pub commit_message: String,
    #[serde(default)]
    pub dependency_group: Option<DependencyGroupRef>,
}

impl CreatePullRequest {
    pub fn group_name(&self) -> Option<&str> {
        self.dependency_group.as_ref().map(|g| g.name.as_str())
    }

    pub fn dependency_refs(&self) -> Vec<DependencyRef> {
        self.dependencies
            .iter()
            .map(ChangedDependency::to_dependency_ref)
            .collect()
    }

    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.name.clone()).collect()
    }

    /// The identity this pull request will be stored under.
    pub fn identity(&self) -> DependencyIdentity {
        DependencyIdentity::from_parts(self.group_name(), self.dependency_refs())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdatePullRequest {
    pub base_commit_sha: String,
    pub dependency_names: Vec<String>,
    #[serde(default)]
    pub updated_dependency_files: Vec<DependencyFile>,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub pr_body: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub dependency_group: Option<DependencyGroupRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClosePullRequest {
    pub dependency_names: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobErrorReport {
    pub error_type: String,
    #[serde(default)]
    pub error_details: Option<Value>,
    /// The event data exactly as the engine wrote it.
    #[serde(skip)]
    pub raw: Value,
}

impl JobErrorReport {
    fn from_value(data: Value) -> Result<Self, serde_json::Error> {
        let mut report: Self = serde_json::from_value(data.clone())?;
        report.raw = data;
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawOutputFile {
    #[serde(default)]
    output: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    expect: RawExpect,
}

#[derive(Debug, Default, Deserialize)]
struct RawExpect {
    #[serde(default)]
    data: Value,
}

/// Read and validate the engine output at `path`.
///
/// A missing or empty file yields no events; anything present but malformed
/// is [`EngineError::InvalidOutput`].
pub fn read_outputs(path: &Path) -> Result<Vec<OutputEvent>, EngineError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let invalid = |reason: String| EngineError::InvalidOutput {
        path: path.to_path_buf(),
        reason,
    };
    let raw: RawOutputFile = serde_yaml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;

    raw.output
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            OutputEvent::from_raw(&entry.kind, entry.expect.data)
                .map_err(|e| invalid(format!("{} event #{index}: {e}", entry.kind)))
        })
        .collect()
}
