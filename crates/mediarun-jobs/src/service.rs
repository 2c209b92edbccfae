//! Entry point tying the tool, the store and eviction together.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mediarun_av::{CommandSpec, ProcessTool, ProgressSnapshot, Readiness};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::event::DonePayload;
use crate::hub::MIN_SUBSCRIBER_BUFFER;
use crate::ids::JobId;
use crate::job::{Artifact, Job, Subscription};
use crate::scheduler::EvictionScheduler;
use crate::status::JobStatus;
use crate::store::JobStore;
use crate::{Error, Result};

/// Default retention after a job finishes: 30 minutes.
const DEFAULT_RETENTION_SECS: u64 = 30 * 60;

/// Default per-subscriber buffer.
const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Job registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// How long a finished job and its artifact are kept.
    pub retention_secs: u64,
    /// Events buffered per subscriber before new ones are dropped.
    pub subscriber_buffer: usize,
    /// Where artifacts are reserved. Defaults to the system temp dir.
    pub output_dir: Option<PathBuf>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION_SECS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            output_dir: None,
        }
    }
}

impl JobSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Non-fatal problems with these settings.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.subscriber_buffer < MIN_SUBSCRIBER_BUFFER {
            warnings.push(format!(
                "jobs.subscriber_buffer = {} is below the minimum of {MIN_SUBSCRIBER_BUFFER}; it will be raised",
                self.subscriber_buffer
            ));
        }
        if self.retention_secs == 0 {
            warnings
                .push("jobs.retention_secs = 0 evicts artifacts as soon as a job finishes".into());
        }
        if let Some(dir) = &self.output_dir {
            if !dir.is_dir() {
                warnings.push(format!("jobs.output_dir {} does not exist", dir.display()));
            }
        }
        warnings
    }
}

/// What to run and where its output goes.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub command: CommandSpec,
    /// Descriptive input reference, for display.
    pub input: String,
    /// File the command writes.
    pub output: PathBuf,
    /// Name the artifact is offered under.
    pub display_name: String,
}

/// Owns every job and runs each on its own task.
///
/// Needs a Tokio runtime: construction spawns the eviction loop.
pub struct JobService {
    tool: Arc<ProcessTool>,
    settings: JobSettings,
    store: Arc<JobStore>,
    scheduler: Arc<EvictionScheduler>,
    shutdown: CancellationToken,
}

impl JobService {
    pub fn new(tool: Arc<ProcessTool>, settings: JobSettings) -> Self {
        let store = Arc::new(JobStore::new());
        let scheduler = Arc::new(EvictionScheduler::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(Arc::clone(&scheduler).run(Arc::clone(&store), shutdown.child_token()));

        Self {
            tool,
            settings,
            store,
            scheduler,
            shutdown,
        }
    }

    pub fn tool(&self) -> &ProcessTool {
        &self.tool
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Resolve and health-check the tool ahead of any job.
    pub async fn ensure_tool(&self) -> Result<Readiness> {
        Ok(self.tool.ensure_ready().await?.clone())
    }

    /// Reserve an artifact file in the output directory, keeping the
    /// extension of `display_name` (`.bin` if it has none).
    pub fn output_path(&self, display_name: &str) -> Result<PathBuf> {
        let ext = Path::new(display_name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "bin".to_string());

        let (_file, path) = tempfile::Builder::new()
            .prefix("mediarun-")
            .suffix(&format!(".{ext}"))
            .tempfile_in(self.settings.output_dir())?
            .keep()
            .map_err(|e| e.error)?;
        Ok(path)
    }

    /// Register a job and start running it in the background.
    pub fn start_job(&self, request: JobRequest) -> JobId {
        let id = JobId::new();
        let job = Arc::new(Job::new(
            id,
            request.input,
            Artifact {
                path: request.output,
                display_name: sanitize_filename(&request.display_name),
            },
            self.settings.subscriber_buffer,
            self.shutdown.child_token(),
        ));
        self.store.insert(Arc::clone(&job));
        tracing::info!(job_id = %id, input = %job.input(), "Job created");

        tokio::spawn(run_job(
            Arc::clone(&self.tool),
            job,
            request.command,
            Arc::clone(&self.scheduler),
            self.settings.retention(),
        ));
        id
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.store.get(id)
    }

    fn job(&self, id: &JobId) -> Result<Arc<Job>> {
        self.store.get(id).ok_or_else(|| Error::not_found(*id))
    }

    pub fn subscribe(&self, id: &JobId) -> Result<Subscription> {
        Ok(self.job(id)?.subscribe())
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatus> {
        Ok(self.job(id)?.status())
    }

    /// The artifact of a finished job.
    pub fn artifact(&self, id: &JobId) -> Result<Artifact> {
        let job = self.job(id)?;
        match job.status() {
            JobStatus::Done => Ok(job.artifact().clone()),
            status => Err(Error::NotReady { id: *id, status }),
        }
    }

    /// Ask a job's run to stop.
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        let job = self.job(id)?;
        tracing::info!(job_id = %id, "Cancelling job");
        job.cancel();
        Ok(())
    }

    /// Stop the eviction loop and cancel every running job.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(jobs = self.store.len(), "Shutting down job service");
            self.shutdown.cancel();
        }
    }
}

impl Drop for JobService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_job(
    tool: Arc<ProcessTool>,
    job: Arc<Job>,
    command: CommandSpec,
    scheduler: Arc<EvictionScheduler>,
    retention: Duration,
) {
    let id = job.id();
    if let Err(e) = job.mark_running() {
        tracing::warn!(job_id = %id, "Job not started: {e}");
        return;
    }
    tracing::info!(job_id = %id, "Job running");

    let sink = {
        let job = Arc::clone(&job);
        move |p: &ProgressSnapshot| {
            job.publish_progress(p);
            ControlFlow::Continue(())
        }
    };
    let outcome = tool
        .run_cancellable(&command, Some(sink), job.cancel_token())
        .await;

    let finished = match outcome {
        Ok(_) => {
            let payload = DonePayload {
                download: format!("/jobs/{id}/artifact"),
                name: job.artifact().display_name.clone(),
            };
            tracing::info!(job_id = %id, artifact = %job.artifact().path.display(), "Job done");
            job.finish_done(&payload)
        }
        Err(e) if e.is_readiness() => {
            tracing::error!(job_id = %id, "Tool not ready: {e}");
            job.finish_error(e.to_string())
        }
        Err(e) => {
            tracing::error!(job_id = %id, "Job failed: {e}");
            job.finish_error(e.to_string())
        }
    };
    if let Err(e) = finished {
        tracing::warn!(job_id = %id, "Could not record outcome: {e}");
    }

    scheduler.schedule(id, retention);
}

/// Strip quotes and line breaks from a download name. Empty names fall
/// back to `output.bin`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '"' | '\n' | '\r'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "output.bin".to_string()
    } else {
        cleaned.to_string()
    }
}
