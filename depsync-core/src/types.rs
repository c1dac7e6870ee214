//! Domain types shared by every depsync crate.
//!
//! Wire-facing structs use the update engine's kebab-case field names so they
//! can be handed to serde without an intermediate mapping layer.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Pull request property holding the engine package manager.
pub const PROPERTY_PACKAGE_MANAGER: &str = "Dependabot.PackageManager";

/// Pull request property holding the JSON-serialized dependency identity.
pub const PROPERTY_DEPENDENCIES: &str = "Dependabot.Dependencies";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of one update job; also names its workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl JobId {
    /// The job id reduced to the engine's identifier syntax (`[a-z0-9-]`).
    pub fn sanitized(&self) -> String {
        let mapped: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        mapped.trim_matches('-').to_string()
    }
}

/// Package manager name as the update engine spells it (`npm_and_yarn`, `nuget`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageManager(pub String);

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PackageManager {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl PackageManager {
    /// Map a configuration ecosystem name to the engine's package manager.
    pub fn from_ecosystem(ecosystem: &str) -> Self {
        let mapped = match ecosystem {
            "npm" | "yarn" | "pnpm" => "npm_and_yarn",
            "gomod" => "go_modules",
            "gitsubmodule" => "submodules",
            "mix" => "hex",
            "pip" | "pipenv" | "pip-compile" | "poetry" => "pip",
            other => other,
        };
        Self(mapped.to_string())
    }
}

// ---------------------------------------------------------------------------
// Dependencies and identities
// ---------------------------------------------------------------------------

/// One dependency touched by an update, as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyRef {
    pub dependency_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
}

impl DependencyRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            dependency_name: name.into(),
            dependency_version: Some(version.into()),
            ..Self::default()
        }
    }
}

/// A grouped update's stored identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupIdentity {
    pub dependency_group_name: String,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
}

/// What a pull request updates: either a flat dependency list or a named group.
///
/// Serialized into the [`PROPERTY_DEPENDENCIES`] property of every managed PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyIdentity {
    Group(GroupIdentity),
    Dependencies(Vec<DependencyRef>),
}

impl DependencyIdentity {
    pub fn from_parts(group: Option<&str>, dependencies: Vec<DependencyRef>) -> Self {
        match group {
            Some(name) => Self::Group(GroupIdentity {
                dependency_group_name: name.to_string(),
                dependencies,
            }),
            None => Self::Dependencies(dependencies),
        }
    }

    pub fn group_name(&self) -> Option<&str> {
        match self {
            Self::Group(g) => Some(&g.dependency_group_name),
            Self::Dependencies(_) => None,
        }
    }

    pub fn dependencies(&self) -> &[DependencyRef] {
        match self {
            Self::Group(g) => &g.dependencies,
            Self::Dependencies(deps) => deps,
        }
    }

    /// Dependency names as a set; identity comparison ignores order and versions.
    pub fn name_set(&self) -> BTreeSet<&str> {
        self.dependencies()
            .iter()
            .map(|d| d.dependency_name.as_str())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.name_set().into_iter().map(str::to_string).collect()
    }

    /// Exact set equality against a list of names from an output event.
    pub fn matches_names<S: AsRef<str>>(&self, names: &[S]) -> bool {
        let other: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
        self.name_set() == other
    }

    pub fn to_property_value(&self) -> String {
        // Serializing plain data structures cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Existing pull requests
// ---------------------------------------------------------------------------

/// A single custom key/value property on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestProperty {
    pub name: String,
    pub value: String,
}

/// An open pull request read from the hosting platform before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingPullRequestRecord {
    pub id: i64,
    #[serde(default)]
    pub properties: Vec<PullRequestProperty>,
}

impl ExistingPullRequestRecord {
    /// Build the record the platform will hold for a freshly created PR.
    pub fn managed(id: i64, package_manager: &PackageManager, identity: &DependencyIdentity) -> Self {
        Self {
            id,
            properties: vec![
                PullRequestProperty {
                    name: PROPERTY_PACKAGE_MANAGER.to_string(),
                    value: package_manager.0.clone(),
                },
                PullRequestProperty {
                    name: PROPERTY_DEPENDENCIES.to_string(),
                    value: identity.to_property_value(),
                },
            ],
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn package_manager(&self) -> Option<&str> {
        self.property(PROPERTY_PACKAGE_MANAGER)
    }

    /// Parsed dependency identity; `None` when absent or not valid JSON.
    pub fn identity(&self) -> Option<DependencyIdentity> {
        let raw = self.property(PROPERTY_DEPENDENCIES)?;
        serde_json::from_str(raw).ok()
    }

    /// Whether this PR is "the same logical update" as an event's dependency names.
    pub fn matches<S: AsRef<str>>(&self, package_manager: &PackageManager, names: &[S]) -> bool {
        if self.package_manager() != Some(package_manager.0.as_str()) {
            return false;
        }
        self.identity()
            .map(|identity| identity.matches_names(names))
            .unwrap_or(false)
    }
}

/// Find the first record matching a package manager and a dependency name set.
pub fn find_matching<'a, S: AsRef<str>>(
    records: &'a [ExistingPullRequestRecord],
    package_manager: &PackageManager,
    names: &[S],
) -> Option<&'a ExistingPullRequestRecord> {
    records.iter().find(|r| r.matches(package_manager, names))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
