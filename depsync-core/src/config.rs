//! Update configuration (`dependabot.yml` shape).
//!
//! # Layout
//!
//! ```text
//! version: 2
//! registries:
//!   <name>: { type, url | registry | host | organization, username, password | token | key, replaces-base }
//! updates:
//!   - package-ecosystem: npm
//!     directory: /
//!     ...
//! ```
//!
//! The file is read from an explicit path; discovering it inside a repository
//! is the caller's job. Everything that can be rejected is rejected in
//! [`UpdateConfigFile::validate`], before a job is ever built.

use std::path::Path;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

use crate::error::{io_err, ConfigError};

/// Default `open-pull-requests-limit` when the update does not set one.
pub const DEFAULT_OPEN_PULL_REQUESTS_LIMIT: u32 = 5;

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Root of an update configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateConfigFile {
    pub version: u32,
    #[serde(default, deserialize_with = "ordered_map")]
    pub registries: Vec<(String, RegistryConfig)>,
    #[serde(default)]
    pub updates: Vec<UpdateConfig>,
}

impl UpdateConfigFile {
    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: Self = serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        file.validate()?;
        Ok(file)
    }

    pub fn registry(&self, name: &str) -> Option<&RegistryConfig> {
        self.registries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// Registries an update may use, in declaration order.
    ///
    /// `"*"` in the update's `registries` list selects every declared registry.
    pub fn registries_for<'a>(
        &'a self,
        update: &UpdateConfig,
    ) -> Result<Vec<(&'a str, &'a RegistryConfig)>, ConfigError> {
        if update.registries.iter().any(|r| r == "*") {
            return Ok(self
                .registries
                .iter()
                .map(|(n, r)| (n.as_str(), r))
                .collect());
        }
        update
            .registries
            .iter()
            .map(|name| {
                self.registries
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(n, r)| (n.as_str(), r))
                    .ok_or_else(|| ConfigError::UnknownRegistry {
                        ecosystem: update.package_ecosystem.clone(),
                        registry: name.clone(),
                    })
            })
            .collect()
    }

    /// Reject configuration the job builder could not turn into a valid job.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 2 {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        if self.updates.is_empty() {
            return Err(ConfigError::NoUpdates);
        }
        for (name, registry) in &self.registries {
            registry.validate(name)?;
        }
        for update in &self.updates {
            if update.directory.is_none() && update.directories.is_empty() {
                return Err(ConfigError::MissingField {
                    ecosystem: update.package_ecosystem.clone(),
                    field: "directory",
                });
            }
            update.versioning_strategy()?;
            self.registries_for(update)?;
        }
        Ok(())
    }
}

/// Load and validate the configuration file at `path`.
pub fn load_at(path: &Path) -> Result<UpdateConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    UpdateConfigFile::from_yaml_str(&contents, path)
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// One `updates` entry: what to update, where, and how PRs should look.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateConfig {
    pub package_ecosystem: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default = "default_open_pull_requests_limit")]
    pub open_pull_requests_limit: u32,
    #[serde(default, rename = "versioning-strategy")]
    pub versioning_strategy_raw: Option<String>,
    #[serde(default)]
    pub allow: Vec<AllowCondition>,
    #[serde(default)]
    pub ignore: Vec<IgnoreCondition>,
    #[serde(default)]
    pub commit_message: Option<CommitMessageConfig>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub groups: Vec<(String, GroupConfig)>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Work item to link created pull requests to.
    #[serde(default)]
    pub milestone: Option<u64>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub registries: Vec<String>,
    #[serde(default)]
    pub pull_request_branch_name: Option<BranchNameConfig>,
    #[serde(default)]
    pub insecure_external_code_execution: Option<String>,
    #[serde(default)]
    pub vendor: bool,
}

fn default_open_pull_requests_limit() -> u32 {
    DEFAULT_OPEN_PULL_REQUESTS_LIMIT
}

impl UpdateConfig {
    /// Security-only updates are signalled by a limit of exactly zero.
    pub fn is_security_only(&self) -> bool {
        self.open_pull_requests_limit == 0
    }

    pub fn versioning_strategy(&self) -> Result<VersioningStrategy, ConfigError> {
        VersioningStrategy::parse(self.versioning_strategy_raw.as_deref())
    }

    /// Branch name separator, `/` unless configured.
    pub fn branch_separator(&self) -> &str {
        self.pull_request_branch_name
            .as_ref()
            .and_then(|b| b.separator.as_deref())
            .unwrap_or("/")
    }

    /// The single directory this update targets, if it targets exactly one.
    pub fn primary_directory(&self) -> Option<&str> {
        self.directory
            .as_deref()
            .or_else(|| match self.directories.as_slice() {
                [only] => Some(only.as_str()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AllowCondition {
    #[serde(default)]
    pub dependency_name: Option<String>,
    #[serde(default)]
    pub dependency_type: Option<String>,
    #[serde(default)]
    pub update_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IgnoreCondition {
    pub dependency_name: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub versions: Vec<String>,
    #[serde(default)]
    pub update_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitMessageConfig {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub prefix_development: Option<String>,
    #[serde(default)]
    pub include: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupConfig {
    #[serde(default)]
    pub applies_to: Option<String>,
    #[serde(default)]
    pub dependency_type: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub update_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchNameConfig {
    #[serde(default)]
    pub separator: Option<String>,
}

// ---------------------------------------------------------------------------
// Versioning strategy
// ---------------------------------------------------------------------------

/// How requirement ranges are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersioningStrategy {
    #[default]
    Auto,
    Increase,
    IncreaseIfNecessary,
    LockfileOnly,
    Widen,
}

impl VersioningStrategy {
    pub fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw {
            None | Some("auto") => Ok(Self::Auto),
            Some("increase") => Ok(Self::Increase),
            Some("increase-if-necessary") => Ok(Self::IncreaseIfNecessary),
            Some("lockfile-only") => Ok(Self::LockfileOnly),
            Some("widen") => Ok(Self::Widen),
            Some(other) => Err(ConfigError::UnknownVersioningStrategy(other.to_string())),
        }
    }

    /// The engine's `requirements-update-strategy`, if any.
    pub fn requirements_update_strategy(self) -> Option<&'static str> {
        match self {
            Self::Auto | Self::LockfileOnly => None,
            Self::Increase => Some("bump_versions"),
            Self::IncreaseIfNecessary => Some("bump_versions_if_necessary"),
            Self::Widen => Some("widen_ranges"),
        }
    }

    pub fn lockfile_only(self) -> bool {
        self == Self::LockfileOnly
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// A private registry declaration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub replaces_base: Option<bool>,
}

impl RegistryConfig {
    /// Check that the locator the engine needs for this registry type is present.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRegistry {
            name: name.to_string(),
            kind: self.kind.clone(),
            reason: reason.to_string(),
        };
        match self.kind.as_str() {
            "" => Err(invalid("'type' is required")),
            "hex-organization" if self.organization.is_none() => {
                Err(invalid("'organization' is required"))
            }
            "hex-organization" => Ok(()),
            "terraform-registry" if self.url.is_none() && self.host.is_none() => {
                Err(invalid("'url' or 'host' is required"))
            }
            "docker-registry" | "npm-registry"
                if self.url.is_none() && self.registry.is_none() =>
            {
                Err(invalid("'url' or 'registry' is required"))
            }
            "terraform-registry" | "docker-registry" | "npm-registry" => Ok(()),
            _ if self.url.is_none() => Err(invalid("'url' is required")),
            _ => Ok(()),
        }
    }

    /// Replace `${{ NAME }}` placeholders in secret fields using `lookup`.
    pub fn resolve_placeholders(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for field in [
            &mut self.username,
            &mut self.password,
            &mut self.token,
            &mut self.key,
        ] {
            if let Some(value) = field.as_mut() {
                *value = substitute(value, &lookup);
            }
        }
    }
}

fn substitute(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${{") {
        let Some(end) = rest[start..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = rest[start + 3..start + end].trim();
        match lookup(name) {
            Some(resolved) => out.push_str(&resolved),
            None => out.push_str(&rest[start..start + end + 2]),
        }
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Deserialize a YAML mapping keeping declaration order.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    mapping
        .into_iter()
        .map(|(key, value)| {
            let name = key
                .as_str()
                .ok_or_else(|| D::Error::custom("mapping keys must be strings"))?
                .to_string();
            let parsed = serde_yaml::from_value(value).map_err(D::Error::custom)?;
            Ok((name, parsed))
        })
        .collect()
}

/// Accept either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(yaml: &str) -> Result<UpdateConfigFile, ConfigError> {
        UpdateConfigFile::from_yaml_str(yaml, &PathBuf::from("dependabot.yml"))
    }

    #[test]
    fn minimal_update_gets_defaults() {
        let file = parse(
            "version: 2\nupdates:\n  - package-ecosystem: npm\n    directory: /\n",
        )
        .expect("parse");
        let update = &file.updates[0];
        assert_eq!(update.open_pull_requests_limit, DEFAULT_OPEN_PULL_REQUESTS_LIMIT);
        assert_eq!(update.branch_separator(), "/");
        assert_eq!(update.versioning_strategy().unwrap(), VersioningStrategy::Auto);
        assert!(!update.is_security_only());
    }

    #[test]
    fn unknown_versioning_strategy_is_rejected_on_load() {
        let err = parse(
            "version: 2\nupdates:\n  - package-ecosystem: npm\n    directory: /\n    versioning-strategy: sideways\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownVersioningStrategy(s) if s == "sideways"));
    }

    #[test]
    fn wildcard_selects_registries_in_declaration_order() {
        let file = parse(
            r#"version: 2
registries:
  zeta:
    type: nuget-feed
    url: https://z.example/index.json
  alpha:
    type: npm-registry
    registry: npm.example
updates:
  - package-ecosystem: npm
    directory: /
    registries: "*"
"#,
        )
        .expect("parse");
        let names: Vec<_> = file
            .registries_for(&file.updates[0])
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn unknown_registry_reference_is_rejected() {
        let err = parse(
            "version: 2\nupdates:\n  - package-ecosystem: npm\n    directory: /\n    registries: [ghost]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRegistry { registry, .. } if registry == "ghost"));
    }

    #[test]
    fn registry_without_url_is_invalid() {
        let err = parse(
            "version: 2\nregistries:\n  feed:\n    type: nuget-feed\nupdates:\n  - package-ecosystem: nuget\n    directory: /\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegistry { .. }));
    }

    #[test]
    fn placeholders_are_substituted() {
        let mut registry = RegistryConfig {
            kind: "nuget-feed".into(),
            url: Some("https://feed".into()),
            password: Some("pre-${{ FEED_PAT }}-post".into()),
            token: Some("${{MISSING}}".into()),
            ..Default::default()
        };
        registry.resolve_placeholders(|name| (name == "FEED_PAT").then(|| "s3cr3t".to_string()));
        assert_eq!(registry.password.as_deref(), Some("pre-s3cr3t-post"));
        assert_eq!(registry.token.as_deref(), Some("${{MISSING}}"));
    }
}
