//! Running the update engine for one job.
//!
//! Run flow: write `job.yaml` (tmp → chmod 0600 → rename) → spawn
//! `dependabot update -f <in> -o <out>` → wait (bounded) → read `output.yaml`.
//!
//! If `output.yaml` already exists and is non-empty the engine is not
//! started again; the earlier output is read as-is.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use depsync_core::JobFile;

use crate::error::{io_err, EngineError};
use crate::output::{read_outputs, OutputEvent};
use crate::workspace::JobWorkspace;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Wall-clock limit for one engine run unless the caller picks another.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Per-run engine options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on engine wall-clock time.
    pub timeout: Duration,
    pub updater_image: Option<String>,
    pub proxy_image: Option<String>,
    pub collector_image: Option<String>,
    /// Exported as `LOCAL_GITHUB_ACCESS_TOKEN` for the engine's own lookups.
    pub github_access_token: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_JOB_TIMEOUT,
            updater_image: None,
            proxy_image: None,
            collector_image: None,
            github_access_token: None,
        }
    }
}

/// How the engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Exited with status 0.
    Completed,
    /// Exited non-zero. Whatever output it produced is still processed.
    FailedNonfatal { code: Option<i32> },
    /// Not started; a previous run's output was reused.
    Resumed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub job_id: String,
    pub state: RunState,
    pub events: Vec<OutputEvent>,
}

/// Runs one job in a prepared workspace.
pub trait JobRunner {
    fn run(
        &self,
        workspace: &JobWorkspace,
        job: &JobFile,
        options: &RunOptions,
    ) -> Result<RunReport, EngineError>;
}

/// Launches the engine executable for prepared job workspaces.
#[derive(Debug, Clone)]
pub struct EngineInvoker {
    executable: PathBuf,
}

impl EngineInvoker {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run one job to completion and return its parsed output.
    pub fn run(
        &self,
        workspace: &JobWorkspace,
        job: &JobFile,
        options: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        JobRunner::run(self, workspace, job, options)
    }

    fn command(&self, workspace: &JobWorkspace, options: &RunOptions) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg("update")
            .arg("-f")
            .arg(&workspace.input_path)
            .arg("-o")
            .arg(&workspace.output_path);
        if let Some(image) = &options.updater_image {
            command.args(["--updater-image", image]);
        }
        if let Some(image) = &options.proxy_image {
            command.args(["--proxy-image", image]);
        }
        if let Some(image) = &options.collector_image {
            command.args(["--collector-image", image]);
        }
        command.env("DEPENDABOT_JOB_ID", workspace.job_id.sanitized());
        if let Some(token) = &options.github_access_token {
            command.env("LOCAL_GITHUB_ACCESS_TOKEN", token);
        }
        command
            .current_dir(&workspace.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

impl JobRunner for EngineInvoker {
    fn run(
        &self,
        workspace: &JobWorkspace,
        job: &JobFile,
        options: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        let job_id = workspace.job_id.to_string();

        if has_output(&workspace.output_path) {
            tracing::info!(job = %job_id, "existing engine output found; skipping engine run");
            let events = read_outputs(&workspace.output_path)?;
            return Ok(RunReport {
                job_id,
                state: RunState::Resumed,
                events,
            });
        }

        write_job_file(&workspace.input_path, job)?;

        let mut command = self.command(workspace, options);
        tracing::info!(
            job = %job_id,
            engine = %self.executable.display(),
            "running update engine"
        );
        let child = command.spawn().map_err(|source| EngineError::Spawn {
            program: self.executable.clone(),
            source,
        })?;

        let status = match wait_bounded(child, options.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                discard_partial_output(&workspace.output_path);
                let timeout = options.timeout;
                tracing::error!(job = %job_id, ?timeout, "update engine timed out");
                return Err(EngineError::TimedOut { job_id, timeout });
            }
            Err(err) => return Err(io_err(&self.executable, err)),
        };

        let state = if status.success() {
            tracing::info!(job = %job_id, "update engine finished");
            RunState::Completed
        } else {
            tracing::warn!(job = %job_id, %status, "update engine exited unsuccessfully");
            RunState::FailedNonfatal {
                code: status.code(),
            }
        };

        let events = read_outputs(&workspace.output_path)?;
        tracing::debug!(job = %job_id, events = events.len(), "engine output parsed");
        Ok(RunReport {
            job_id,
            state,
            events,
        })
    }
}

fn has_output(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Serialize the job file next to its final location, then rename into place.
fn write_job_file(path: &Path, job: &JobFile) -> Result<(), EngineError> {
    let yaml = serde_yaml::to_string(job)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), EngineError> {
    Ok(())
}

/// `Ok(None)` means the deadline passed and the child was killed.
fn wait_bounded(mut child: Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn discard_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial engine output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), "could not remove partial output: {err}"),
    }
}
