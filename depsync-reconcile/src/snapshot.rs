//! Dependency list snapshots reported by the engine.
//!
//! Persists one JSON document per package manager and directory at
//! `<dir>/<package_manager>[-<directory>].json`. Writes use the atomic
//! `.tmp` + rename pattern.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depsync_engine::output::{DependencyListSnapshot, ListedDependency};

use crate::error::{io_err, ReconcileError};

/// On-disk snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotFile {
    pub recorded_at: DateTime<Utc>,
    pub package_manager: String,
    #[serde(default)]
    pub directory: Option<String>,
    pub dependencies: Vec<ListedDependency>,
    pub dependency_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<package_manager>[-<directory>].json`
    pub fn path_for(&self, package_manager: &str, directory: Option<&str>) -> PathBuf {
        let dir_part: String = directory
            .map(|d| d.trim_matches('/'))
            .filter(|d| !d.is_empty())
            .map(|d| format!("-{}", d.replace('/', "-")))
            .unwrap_or_default();
        self.dir.join(format!("{package_manager}{dir_part}.json"))
    }

    /// Save `snapshot` atomically and return where it went.
    pub fn save(
        &self,
        package_manager: &str,
        directory: Option<&str>,
        snapshot: &DependencyListSnapshot,
    ) -> Result<PathBuf, ReconcileError> {
        let path = self.path_for(package_manager, directory);
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let file = SnapshotFile {
            recorded_at: Utc::now(),
            package_manager: package_manager.to_string(),
            directory: directory.map(str::to_string),
            dependencies: snapshot.dependencies.clone(),
            dependency_files: snapshot.dependency_files.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        tracing::debug!(path = %path.display(), "dependency snapshot saved");
        Ok(path)
    }

    /// Load a snapshot; `None` if it was never saved.
    pub fn load(
        &self,
        package_manager: &str,
        directory: Option<&str>,
    ) -> Result<Option<SnapshotFile>, ReconcileError> {
        let path = self.path_for(package_manager, directory);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}
