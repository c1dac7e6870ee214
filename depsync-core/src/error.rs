//! Error types for depsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating update configuration.
///
/// All of these are fatal and surface before any subprocess or API call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the offending path.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Only version 2 of the configuration format is understood.
    #[error("unsupported configuration version {0}; expected 2")]
    UnsupportedVersion(u32),

    /// The configuration declares no `updates` entries.
    #[error("configuration contains no updates")]
    NoUpdates,

    /// An update entry is missing a field it cannot do without.
    #[error("update for '{ecosystem}' is missing '{field}'")]
    MissingField {
        ecosystem: String,
        field: &'static str,
    },

    /// `versioning-strategy` is not one of the recognised values.
    #[error("unknown versioning strategy '{0}'")]
    UnknownVersioningStrategy(String),

    /// A registry entry lacks the locator its type requires.
    #[error("registry '{name}' of type '{kind}' is invalid: {reason}")]
    InvalidRegistry {
        name: String,
        kind: String,
        reason: String,
    },

    /// An update references a registry that is not declared.
    #[error("update for '{ecosystem}' references unknown registry '{registry}'")]
    UnknownRegistry { ecosystem: String, registry: String },
}

/// Errors raised while assembling a job definition.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Security-only updates must be told exactly which dependencies to touch.
    #[error("update for '{0}' is security-only (open-pull-requests-limit 0) and needs explicit target dependencies")]
    SecurityTargetsRequired(String),

    /// The pull request to refresh carries no parsable dependency identity.
    #[error("pull request #{0} has no dependency identity to refresh")]
    MissingIdentity(i64),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
