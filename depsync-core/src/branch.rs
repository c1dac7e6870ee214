//! Deterministic branch names for update pull requests.
//!
//! ```text
//! dependabot/<ecosystem>[/<target-branch>][/<directory>]/<dependency-segment>
//! ```
//!
//! The dependency segment is `<name>-<version>` for a single dependency,
//! `<name>-removed` when that dependency is being removed, and
//! `<group>-<hash>` or `multi-<hash>` otherwise. The hash is the first 10 hex
//! characters of a SHA-256 digest over the sorted `name-version` pairs, so
//! member order never matters but any version change does.

use sha2::{Digest, Sha256};

use crate::types::DependencyRef;

const PREFIX: &str = "dependabot";
const DIGEST_LEN: usize = 10;

/// Build the branch name for an update.
pub fn branch_name(
    ecosystem: &str,
    target_branch: Option<&str>,
    directory: Option<&str>,
    group: Option<&str>,
    dependencies: &[DependencyRef],
    separator: &str,
) -> String {
    let mut segments: Vec<String> = vec![PREFIX.to_string(), ecosystem.to_string()];
    if let Some(target) = target_branch.filter(|t| !t.is_empty()) {
        segments.push(target.to_string());
    }
    if let Some(dir) = directory.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) {
        segments.push(dir.to_string());
    }
    segments.push(dependency_segment(group, dependencies));

    sanitize(&segments.join(separator), separator)
}

fn dependency_segment(group: Option<&str>, dependencies: &[DependencyRef]) -> String {
    if let Some(group) = group {
        return format!("{group}-{}", dependency_digest(dependencies));
    }
    match dependencies {
        [only] if only.removed => format!("{}-removed", only.dependency_name),
        [only] => {
            let version: String = only
                .dependency_version
                .as_deref()
                .unwrap_or_default()
                .chars()
                .filter(|c| *c != '[' && *c != ']')
                .collect();
            format!("{}-{version}", only.dependency_name)
        }
        _ => format!("multi-{}", dependency_digest(dependencies)),
    }
}

/// First 10 hex characters of the digest over the sorted `name-version` pairs.
pub fn dependency_digest(dependencies: &[DependencyRef]) -> String {
    let mut pairs: Vec<String> = dependencies
        .iter()
        .map(|d| {
            format!(
                "{}-{}",
                d.dependency_name,
                d.dependency_version.as_deref().unwrap_or_default()
            )
        })
        .collect();
    pairs.sort();

    let mut h = Sha256::new();
    h.update(pairs.join(",").as_bytes());
    let mut digest = hex::encode(h.finalize());
    digest.truncate(DIGEST_LEN);
    digest
}

/// Make a joined name safe to use as a git ref. Idempotent.
pub fn sanitize(name: &str, separator: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "/_.-".contains(*c) || separator.contains(*c))
        .collect();

    let mut out = collapse(&kept, ".");
    if !separator.is_empty() {
        // A ref path component may not start with a dot.
        out = out.replace(&format!("{separator}."), &format!("{separator}dot-"));
        out = collapse(&out, separator);
    }
    while out.ends_with('.') {
        out.pop();
    }
    out
}

fn collapse(value: &str, run: &str) -> String {
    if run.is_empty() {
        return value.to_string();
    }
    let doubled = run.repeat(2);
    let mut out = value.to_string();
    while out.contains(&doubled) {
        out = out.replace(&doubled, run);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
