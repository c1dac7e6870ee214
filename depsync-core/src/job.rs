//! Job definitions: the update engine's declarative input.
//!
//! [`JobBuilder`] turns one update entry plus a [`TargetSelector`] into a
//! [`JobFile`] (`job` + `credentials`). The result is immutable; every
//! invocation builds its own.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{RegistryConfig, UpdateConfig, UpdateConfigFile};
use crate::error::{ConfigError, JobError};
use crate::types::{
    DependencyRef, ExistingPullRequestRecord, GroupIdentity, JobId, PackageManager,
};

/// Experiment flags handed to the engine verbatim.
pub type Experiments = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Engine input document
// ---------------------------------------------------------------------------

/// The complete engine input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    pub job: JobDefinition,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    pub id: JobId,
    pub package_manager: PackageManager,
    #[serde(default)]
    pub updating_a_pull_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_group_to_refresh: Option<String>,
    #[serde(default)]
    pub dependency_groups: Vec<DependencyGroupRule>,
    #[serde(default)]
    pub allowed_updates: Vec<AllowedUpdate>,
    #[serde(default)]
    pub ignore_conditions: Vec<IgnoreRule>,
    #[serde(default)]
    pub security_updates_only: bool,
    #[serde(default)]
    pub security_advisories: Vec<SecurityAdvisory>,
    pub source: JobSource,
    #[serde(default)]
    pub existing_pull_requests: Vec<Vec<DependencyRef>>,
    #[serde(default)]
    pub existing_group_pull_requests: Vec<GroupIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message_options: Option<CommitMessageOptions>,
    #[serde(default)]
    pub experiments: Experiments,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_update_strategy: Option<String>,
    #[serde(default)]
    pub lockfile_only: bool,
    #[serde(default)]
    pub vendor_dependencies: bool,
    #[serde(default)]
    pub reject_external_code: bool,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobSource {
    pub provider: String,
    pub hostname: String,
    pub api_endpoint: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AllowedUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IgnoreRule {
    pub dependency_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_requirement: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_types: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitMessageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_development: Option<String>,
    #[serde(default)]
    pub include_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyGroupRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<String>,
    pub rules: GroupRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_types: Vec<String>,
}

/// A security advisory for one dependency, pre-computed by the vulnerability source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityAdvisory {
    pub dependency_name: String,
    #[serde(default)]
    pub affected_versions: Vec<String>,
    #[serde(default)]
    pub patched_versions: Vec<String>,
    #[serde(default)]
    pub unaffected_versions: Vec<String>,
}

/// A credential record as the engine expects it.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Credential {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces_base: Option<bool>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("url", &self.url)
            .field("registry", &self.registry)
            .field("index_url", &self.index_url)
            .field("organization", &self.organization)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("key", &redact(&self.key))
            .field("replaces_base", &self.replaces_base)
            .finish()
    }
}

impl Credential {
    fn git_source(host: &str, password: &str) -> Self {
        Self {
            kind: "git_source".to_string(),
            host: Some(host.to_string()),
            username: Some("x-access-token".to_string()),
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    /// Map a configured registry onto the engine's credential fields.
    pub fn from_registry(name: &str, registry: &RegistryConfig) -> Result<Self, ConfigError> {
        registry.validate(name)?;
        let mut credential = Self {
            kind: registry.kind.replace('-', "_"),
            username: registry.username.clone(),
            password: registry.password.clone(),
            token: registry.token.clone(),
            replaces_base: registry.replaces_base,
            ..Self::default()
        };
        match registry.kind.as_str() {
            "docker-registry" | "npm-registry" => {
                credential.registry = registry
                    .registry
                    .clone()
                    .or_else(|| registry.url.as_deref().map(strip_scheme));
            }
            "terraform-registry" => {
                credential.host = registry
                    .host
                    .clone()
                    .or_else(|| registry.url.as_deref().map(host_of));
            }
            "hex-organization" => {
                credential.organization = registry.organization.clone();
                credential.key = registry.key.clone();
            }
            "python-index" => {
                credential.index_url = registry.url.clone();
            }
            _ => {
                credential.url = registry.url.clone();
            }
        }
        Ok(credential)
    }
}

// ---------------------------------------------------------------------------
// Builder inputs
// ---------------------------------------------------------------------------

/// Where the repository lives on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySource {
    pub provider: String,
    pub hostname: String,
    pub api_endpoint: String,
    pub organization: String,
    pub project: String,
    pub repository: String,
}

impl RepositorySource {
    /// Derive the source from an organization URL such as
    /// `https://dev.azure.com/contoso/` or `https://tfs.contoso.com/tfs/DefaultCollection`.
    pub fn azure_devops(organization_url: &str, project: &str, repository: &str) -> Self {
        let (scheme, rest) = organization_url
            .split_once("://")
            .unwrap_or(("https", organization_url));
        let mut parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
        let host = if parts.is_empty() { "" } else { parts.remove(0) };
        let organization = match host.strip_suffix(".visualstudio.com") {
            Some(org) if parts.is_empty() => org.to_string(),
            _ => parts.pop().unwrap_or_default().to_string(),
        };
        let virtual_directory: String = parts.iter().map(|p| format!("{p}/")).collect();
        Self {
            provider: "azure".to_string(),
            hostname: host.to_string(),
            api_endpoint: format!("{scheme}://{host}/{virtual_directory}"),
            organization,
            project: project.to_string(),
            repository: repository.to_string(),
        }
    }

    /// `<organization>/<project>/_git/<repository>`, the engine's repo slug.
    pub fn repo_path(&self) -> String {
        format!("{}/{}/_git/{}", self.organization, self.project, self.repository)
    }
}

/// Which dependencies a job should touch.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSelector {
    /// Let the engine discover every outdated dependency.
    All,
    /// Only these vulnerable dependencies (computed upstream).
    SecuritySubset {
        dependency_names: Vec<String>,
        advisories: Vec<SecurityAdvisory>,
    },
    /// Refresh the dependencies of one existing pull request.
    ExistingPullRequest(ExistingPullRequestRecord),
}

/// Secrets the builder turns into credential records.
#[derive(Clone, Default)]
pub struct CredentialSources {
    /// Hosting-platform access token; needed to clone and push.
    pub platform_token: String,
    /// Optional github.com token to avoid rate limits on release notes.
    pub github_token: Option<String>,
}

impl fmt::Debug for CredentialSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSources")
            .field("platform_token", &"***")
            .field("github_token", &self.github_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything a single build needs beyond the update entry itself.
#[derive(Debug, Clone)]
pub struct JobRequest<'a> {
    pub id: JobId,
    pub target: TargetSelector,
    pub existing_pull_requests: &'a [ExistingPullRequestRecord],
    pub experiments: Experiments,
    pub credentials: CredentialSources,
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds engine input for one update entry.
#[derive(Debug, Clone, Copy)]
pub struct JobBuilder<'a> {
    source: &'a RepositorySource,
    file: &'a UpdateConfigFile,
    update: &'a UpdateConfig,
}

impl<'a> JobBuilder<'a> {
    pub fn new(
        source: &'a RepositorySource,
        file: &'a UpdateConfigFile,
        update: &'a UpdateConfig,
    ) -> Self {
        Self {
            source,
            file,
            update,
        }
    }

    pub fn package_manager(&self) -> PackageManager {
        PackageManager::from_ecosystem(&self.update.package_ecosystem)
    }

    pub fn build(&self, request: JobRequest<'_>) -> Result<JobFile, JobError> {
        let update = self.update;
        let strategy = update.versioning_strategy()?;
        let credentials = self.credentials(&request.credentials)?;
        let package_manager = self.package_manager();
        let security_only = update.is_security_only();

        let mut updating_a_pull_request = false;
        let mut dependencies = None;
        let mut dependency_group_to_refresh = None;
        let mut security_advisories = Vec::new();
        match request.target {
            TargetSelector::All if security_only => {
                return Err(JobError::SecurityTargetsRequired(
                    update.package_ecosystem.clone(),
                ));
            }
            TargetSelector::All => {}
            TargetSelector::SecuritySubset {
                dependency_names,
                advisories,
            } => {
                dependencies = Some(dependency_names);
                security_advisories = advisories;
            }
            TargetSelector::ExistingPullRequest(record) => {
                let identity = record
                    .identity()
                    .ok_or(JobError::MissingIdentity(record.id))?;
                updating_a_pull_request = true;
                dependency_group_to_refresh = identity.group_name().map(str::to_string);
                dependencies = Some(identity.names());
            }
        }

        let (existing_pull_requests, existing_group_pull_requests) =
            split_existing(request.existing_pull_requests, &package_manager);

        let (directory, directories) = if update.directories.is_empty() {
            (update.directory.clone(), None)
        } else {
            (None, Some(update.directories.clone()))
        };

        let job = JobDefinition {
            id: request.id,
            package_manager,
            updating_a_pull_request,
            dependencies,
            dependency_group_to_refresh,
            dependency_groups: self.dependency_groups(),
            allowed_updates: self.allowed_updates(security_only),
            ignore_conditions: self.ignore_conditions(),
            security_updates_only: security_only,
            security_advisories,
            source: JobSource {
                provider: self.source.provider.clone(),
                hostname: self.source.hostname.clone(),
                api_endpoint: self.source.api_endpoint.clone(),
                repo: self.source.repo_path(),
                branch: update.target_branch.clone(),
                commit: None,
                directory,
                directories,
            },
            existing_pull_requests,
            existing_group_pull_requests,
            commit_message_options: update.commit_message.as_ref().map(|c| {
                CommitMessageOptions {
                    prefix: c.prefix.clone(),
                    prefix_development: c.prefix_development.clone(),
                    include_scope: c.include.as_deref() == Some("scope"),
                }
            }),
            experiments: request.experiments,
            requirements_update_strategy: strategy
                .requirements_update_strategy()
                .map(str::to_string),
            lockfile_only: strategy.lockfile_only(),
            vendor_dependencies: update.vendor,
            reject_external_code: update.insecure_external_code_execution.as_deref()
                != Some("allow"),
            debug: request.debug,
        };

        Ok(JobFile { job, credentials })
    }

    /// Platform credential, then the optional github.com token, then registries.
    fn credentials(&self, sources: &CredentialSources) -> Result<Vec<Credential>, ConfigError> {
        let mut credentials = vec![Credential::git_source(
            &self.source.hostname,
            &sources.platform_token,
        )];
        if let Some(token) = sources.github_token.as_deref().filter(|t| !t.is_empty()) {
            credentials.push(Credential::git_source("github.com", token));
        }
        for (name, registry) in self.file.registries_for(self.update)? {
            credentials.push(Credential::from_registry(name, registry)?);
        }
        Ok(credentials)
    }

    fn allowed_updates(&self, security_only: bool) -> Vec<AllowedUpdate> {
        let mut allowed: Vec<AllowedUpdate> = self
            .update
            .allow
            .iter()
            .map(|a| AllowedUpdate {
                dependency_name: a.dependency_name.clone(),
                dependency_type: a.dependency_type.clone(),
                update_type: a.update_type.clone(),
            })
            .collect();
        if allowed.is_empty() {
            allowed.push(AllowedUpdate {
                dependency_type: Some("all".to_string()),
                ..AllowedUpdate::default()
            });
        }
        if security_only {
            for a in allowed.iter_mut().filter(|a| a.update_type.is_none()) {
                a.update_type = Some("security".to_string());
            }
        }
        allowed
    }

    fn ignore_conditions(&self) -> Vec<IgnoreRule> {
        self.update
            .ignore
            .iter()
            .map(|i| IgnoreRule {
                dependency_name: i.dependency_name.clone(),
                version_requirement: (!i.versions.is_empty()).then(|| i.versions.join(", ")),
                update_types: i.update_types.clone(),
                source: "dependabot.yml".to_string(),
            })
            .collect()
    }

    fn dependency_groups(&self) -> Vec<DependencyGroupRule> {
        self.update
            .groups
            .iter()
            .map(|(name, g)| DependencyGroupRule {
                name: name.clone(),
                applies_to: g.applies_to.clone(),
                rules: GroupRules {
                    patterns: g.patterns.clone(),
                    exclude_patterns: g.exclude_patterns.clone(),
                    dependency_type: g.dependency_type.clone(),
                    update_types: g.update_types.clone(),
                },
            })
            .collect()
    }
}

/// Parse `"a,b=false,c=value"` into experiment flags. Bare names mean `true`.
pub fn parse_experiments(raw: &str) -> Experiments {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            None => (entry.to_string(), serde_json::Value::Bool(true)),
            Some((name, value)) => {
                let value = match value.trim() {
                    "true" => serde_json::Value::Bool(true),
                    "false" => serde_json::Value::Bool(false),
                    other => serde_json::Value::String(other.to_string()),
                };
                (name.trim().to_string(), value)
            }
        })
        .collect()
}

/// Split existing PRs of one package manager into ungrouped and grouped snapshots.
fn split_existing(
    records: &[ExistingPullRequestRecord],
    package_manager: &PackageManager,
) -> (Vec<Vec<DependencyRef>>, Vec<GroupIdentity>) {
    let mut flat = Vec::new();
    let mut grouped = Vec::new();
    for record in records {
        if record.package_manager() != Some(package_manager.0.as_str()) {
            continue;
        }
        match record.identity() {
            Some(crate::types::DependencyIdentity::Group(group)) => grouped.push(group),
            Some(crate::types::DependencyIdentity::Dependencies(deps)) => flat.push(deps),
            None => {
                tracing::warn!(pr = record.id, "skipping pull request with unreadable identity");
            }
        }
    }
    (flat, grouped)
}

fn strip_scheme(url: &str) -> String {
    let without = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    without.trim_end_matches('/').to_string()
}

fn host_of(url: &str) -> String {
    strip_scheme(url)
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
