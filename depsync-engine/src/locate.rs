//! Locating (and if needed installing) the update engine executable.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::EngineError;

/// Name of the engine executable.
pub const ENGINE_BINARY: &str = "dependabot";

/// Package installed through `go install` when the engine is missing.
pub const ENGINE_PACKAGE: &str = "github.com/dependabot/cli/cmd/dependabot@latest";

/// A regular file (symlinks followed) with an execute bit where that exists.
fn is_runnable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    #[cfg(unix)]
    let runnable = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    };
    #[cfg(not(unix))]
    let runnable = true;
    meta.is_file() && runnable
}

fn binary_file_name(name: &str) -> String {
    format!("{name}{}", std::env::consts::EXE_SUFFIX)
}

/// Search `PATH` for an executable.
pub fn find_executable_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let dirs = std::env::split_paths(&path_var).collect::<Vec<_>>();
    find_executable_in_dirs(name, &dirs)
}

pub fn find_executable_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.trim().is_empty() {
        return None;
    }
    let file_name = binary_file_name(name);
    dirs.iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(&file_name))
        .find(|candidate| is_runnable(candidate))
}

/// Install locations of `go install` that are often missing from `PATH`.
fn go_bin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(gobin) = std::env::var_os("GOBIN").filter(|v| !v.is_empty()) {
        dirs.push(PathBuf::from(gobin));
    }
    if let Ok(output) = Command::new("go").args(["env", "GOPATH"]).output() {
        let gopath = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() && !gopath.is_empty() {
            dirs.extend(std::env::split_paths(&gopath).map(|p| p.join("bin")));
        }
    }
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home).join("go").join("bin"));
    }
    dirs
}

/// Resolve the engine executable, installing it with `go install` when absent.
pub fn ensure_engine_available() -> Result<PathBuf, EngineError> {
    if let Some(found) = find_executable_in_path(ENGINE_BINARY) {
        tracing::debug!(path = %found.display(), "update engine found on PATH");
        return Ok(found);
    }

    tracing::info!("update engine not found on PATH; installing {ENGINE_PACKAGE}");
    let status = Command::new("go")
        .args(["install", ENGINE_PACKAGE])
        .status()
        .map_err(|e| EngineError::EngineUnavailable(format!("cannot run `go install`: {e}")))?;
    if !status.success() {
        return Err(EngineError::EngineUnavailable(format!(
            "`go install {ENGINE_PACKAGE}` exited with {status}"
        )));
    }

    find_executable_in_path(ENGINE_BINARY)
        .or_else(|| find_executable_in_dirs(ENGINE_BINARY, &go_bin_dirs()))
        .ok_or_else(|| {
            EngineError::EngineUnavailable(format!(
                "`{ENGINE_BINARY}` still not found after installation"
            ))
        })
}
