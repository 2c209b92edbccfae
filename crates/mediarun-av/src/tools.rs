//! External tool resolution, readiness checking and invocation.
//!
//! A [`ProcessTool`] resolves its binary and health-checks it exactly once per
//! instance. The outcome, success or failure, is cached and replayed to every
//! later caller, so a missing ffmpeg is reported the same way on every run
//! without touching the filesystem again.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::command::CommandSpec;
use crate::progress::ProgressSnapshot;
use crate::supervisor::{self, tail_to_string, RunRequest};
use crate::{Error, Result};

/// Default readiness probe deadline: 5 seconds.
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;

/// Default stderr retention per run: 64 KiB.
const DEFAULT_STDERR_LIMIT: usize = 64 * 1024;

/// Version reported when the banner cannot be parsed.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Settings for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Program name looked up on `PATH`, or a path to the executable.
    pub program: PathBuf,
    /// Run deadline in seconds. `0` means unbounded, which suits long
    /// transcodes.
    pub run_timeout_secs: u64,
    /// Deadline for the `-version` readiness probe, independent of the run
    /// deadline.
    pub health_timeout_secs: u64,
    /// How much of the tail of stderr to keep for error messages.
    pub stderr_limit_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            run_timeout_secs: 0,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            stderr_limit_bytes: DEFAULT_STDERR_LIMIT,
        }
    }
}

impl ToolSettings {
    /// Default settings pointing at a specific program.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs.max(1))
    }
}

/// Outcome of a successful readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Absolute path the program resolved to.
    pub path: PathBuf,
    /// Version token from the banner, or [`UNKNOWN_VERSION`].
    pub version: String,
}

/// An external binary with a cached readiness check.
#[derive(Debug)]
pub struct ProcessTool {
    name: String,
    settings: ToolSettings,
    readiness: OnceCell<Result<Readiness>>,
}

impl ProcessTool {
    pub fn new(settings: ToolSettings) -> Self {
        let name = settings
            .program
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| settings.program.to_string_lossy().to_string());

        Self {
            name,
            settings,
            readiness: OnceCell::new(),
        }
    }

    /// An `ffmpeg` found on `PATH`, no run deadline.
    pub fn ffmpeg() -> Self {
        Self::new(ToolSettings::default())
    }

    /// Short name used in logs and error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    /// Resolve and health-check the binary, once.
    ///
    /// Concurrent first callers wait on the same check; every call after it
    /// returns the cached outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::ToolNotFound`] if the program is not on the search path.
    /// - [`Error::ToolUnhealthy`] if `-version` exits non-zero or does not
    ///   finish within the health deadline.
    pub async fn ensure_ready(&self) -> Result<&Readiness> {
        self.readiness
            .get_or_init(|| self.check())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Version token of the resolved binary.
    pub async fn version(&self) -> Result<String> {
        Ok(self.ensure_ready().await?.version.clone())
    }

    async fn check(&self) -> Result<Readiness> {
        let program = &self.settings.program;
        let path = which::which(program).map_err(|e| {
            let err = Error::tool_not_found(
                &self.name,
                format!("program={} ({e})", program.display()),
            );
            tracing::warn!(tool = %self.name, "{err}");
            err
        })?;

        let outcome = probe_version(&self.name, &path, self.settings.health_timeout()).await;
        match &outcome {
            Ok(ready) => tracing::info!(
                tool = %self.name,
                path = %ready.path.display(),
                version = %ready.version,
                "Tool ready"
            ),
            Err(e) => tracing::warn!(tool = %self.name, "{e}"),
        }
        outcome
    }

    /// Run a command to completion, discarding its progress output.
    pub async fn run(&self, cmd: &CommandSpec) -> Result<ProgressSnapshot> {
        self.run_cancellable(cmd, None::<NoSink>, &CancellationToken::new())
            .await
    }

    /// Run a command, handing each decoded progress snapshot to `on_progress`.
    ///
    /// Returning [`ControlFlow::Break`] from the callback stops the run.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &CommandSpec,
        on_progress: F,
    ) -> Result<ProgressSnapshot>
    where
        F: FnMut(&ProgressSnapshot) -> ControlFlow<()> + Send,
    {
        self.run_cancellable(cmd, Some(on_progress), &CancellationToken::new())
            .await
    }

    /// Run a command that the caller can stop through `cancel`.
    ///
    /// The argument vector is snapshotted here, so mutating `cmd` afterwards
    /// never affects the running process.
    pub async fn run_cancellable<F>(
        &self,
        cmd: &CommandSpec,
        on_progress: Option<F>,
        cancel: &CancellationToken,
    ) -> Result<ProgressSnapshot>
    where
        F: FnMut(&ProgressSnapshot) -> ControlFlow<()> + Send,
    {
        let ready = self.ensure_ready().await?;
        let request = RunRequest {
            tool: self.name.clone(),
            program: ready.path.clone(),
            args: cmd.to_args(),
            timeout: self.settings.run_timeout(),
            stderr_limit: self.settings.stderr_limit_bytes,
        };
        supervisor::supervise(request, on_progress, cancel).await
    }

    /// Run the tool with `args` and parse its stdout as JSON.
    ///
    /// This is the request/response path used for probing-style tools whose
    /// whole answer arrives at once.
    ///
    /// # Errors
    ///
    /// - The cached readiness error, if the tool is not ready.
    /// - [`Error::Timeout`] if the run deadline expires.
    /// - [`Error::ProcessFailed`] on a non-zero exit (includes stderr).
    /// - [`Error::DecodeFailed`] if stdout is not the expected JSON.
    pub async fn capture_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let ready = self.ensure_ready().await?;

        let mut cmd = Command::new(&ready.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.settings.run_timeout() {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    return Err(Error::Timeout {
                        tool: self.name.clone(),
                        after: limit,
                        stderr: String::new(),
                    })
                }
            },
            None => cmd.output().await,
        }
        .map_err(|e| Error::launch_failed(&self.name, e.to_string()))?;

        if !output.status.success() {
            return Err(Error::ProcessFailed {
                tool: self.name.clone(),
                status: output.status.to_string(),
                stderr: tail_to_string(&output.stderr, self.settings.stderr_limit_bytes),
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::decode_failed(&self.name, e.to_string()))
    }
}

type NoSink = fn(&ProgressSnapshot) -> ControlFlow<()>;

/// Run `<path> -version` under `limit` and parse the banner.
async fn probe_version(name: &str, path: &Path, limit: Duration) -> Result<Readiness> {
    let mut cmd = Command::new(path);
    cmd.arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let cannot_run = |detail: String| {
        Error::tool_unhealthy(
            name,
            format!("exists but cannot run (path={}): {detail}", path.display()),
        )
    };

    let child = cmd.spawn().map_err(|e| cannot_run(e.to_string()))?;

    // Dropping the timed-out future drops the child, which kills it.
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| cannot_run(e.to_string()))?,
        Err(_elapsed) => {
            return Err(Error::tool_unhealthy(
                name,
                format!("check timed out after {limit:?} (path={})", path.display()),
            ))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(cannot_run(format!("{}; stderr={}", output.status, stderr.trim())));
    }

    let version = parse_version(&String::from_utf8_lossy(&output.stdout))
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

    Ok(Readiness {
        path: path.to_path_buf(),
        version,
    })
}

/// Token following a case-insensitive `version` marker on the first line.
fn parse_version(banner: &str) -> Option<String> {
    let first = banner.lines().next()?;
    let parts: Vec<&str> = first.split_whitespace().collect();
    parts
        .windows(2)
        .find(|w| w[0].eq_ignore_ascii_case("version"))
        .map(|w| w[1].to_string())
}
