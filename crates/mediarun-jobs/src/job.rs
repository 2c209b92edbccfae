//! A single supervised run and its live subscribers.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use mediarun_av::ProgressSnapshot;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::{DonePayload, JobEvent};
use crate::hub::Hub;
use crate::ids::JobId;
use crate::status::JobStatus;
use crate::{Error, Result};

/// The file a job writes and the name it is offered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub display_name: String,
}

struct JobState {
    status: JobStatus,
    error: Option<String>,
    hub: Hub,
}

/// One unit of work: status, diagnostics and the subscriber hub.
///
/// Status, error text and subscribers share one mutex. Broadcasting happens
/// under it, which is safe because the hub never blocks.
pub struct Job {
    id: JobId,
    created_at: DateTime<Utc>,
    input: String,
    artifact: Artifact,
    subscriber_buffer: usize,
    cancel: CancellationToken,
    state: Mutex<JobState>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("input", &self.input)
            .field("artifact", &self.artifact)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(
        id: JobId,
        input: impl Into<String>,
        artifact: Artifact,
        subscriber_buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            input: input.into(),
            artifact,
            subscriber_buffer,
            cancel,
            state: Mutex::new(JobState {
                status: JobStatus::Created,
                error: None,
                hub: Hub::default(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Descriptive reference to the input, for display only.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    /// Diagnostic text once the job is in `error`.
    pub fn error_text(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().hub.len()
    }

    /// Token the run is bound to.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the run to stop. The job ends in whatever state the run reports.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Attach a new subscriber.
    ///
    /// The current status is always the first event. If the job has already
    /// finished, that status is the only event and the stream then ends.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let mut state = self.state.lock();
        let first = JobEvent::status(state.status);
        let reg = state.hub.add(self.subscriber_buffer, first);
        Subscription {
            id: reg.id,
            job: Arc::downgrade(self),
            rx: reg.rx,
            dropped: reg.dropped,
        }
    }

    fn unsubscribe(&self, subscriber: u64) {
        if self.state.lock().hub.remove(subscriber) {
            tracing::trace!(job_id = %self.id, subscriber, "Unsubscribed");
        }
    }

    /// `created → running`.
    pub fn mark_running(&self) -> Result<()> {
        let mut state = self.state.lock();
        transition(&mut state, JobStatus::Running)?;
        state.hub.broadcast(&JobEvent::status(JobStatus::Running));
        Ok(())
    }

    /// Forward a progress snapshot. Ignored unless the job is running.
    pub fn publish_progress(&self, snapshot: &ProgressSnapshot) -> bool {
        let mut state = self.state.lock();
        if state.status != JobStatus::Running {
            return false;
        }
        state.hub.broadcast(&JobEvent::progress(snapshot));
        true
    }

    /// `running → done`, then close every stream.
    pub fn finish_done(&self, payload: &DonePayload) -> Result<()> {
        let mut state = self.state.lock();
        transition(&mut state, JobStatus::Done)?;
        state
            .hub
            .close([JobEvent::status(JobStatus::Done), JobEvent::done(payload)]);
        Ok(())
    }

    /// `running → error`, record the diagnostic text, then close every stream.
    pub fn finish_error(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        let mut state = self.state.lock();
        transition(&mut state, JobStatus::Error)?;
        state.error = Some(text.clone());
        state
            .hub
            .close([JobEvent::status(JobStatus::Error), JobEvent::error(text)]);
        Ok(())
    }
}

fn transition(state: &mut JobState, to: JobStatus) -> Result<()> {
    if !state.status.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            from: state.status,
            to,
        });
    }
    state.status = to;
    Ok(())
}

/// A live view of one job's events.
///
/// Dropping the subscription deregisters it.
pub struct Subscription {
    id: u64,
    job: Weak<Job>,
    rx: mpsc::Receiver<JobEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        self.rx.try_recv().ok()
    }

    /// Events skipped because this subscriber's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(job) = self.job.upgrade() {
            job.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use futures::StreamExt;

    fn job(buffer: usize) -> Arc<Job> {
        Arc::new(Job::new(
            JobId::new(),
            "upload: clip.mkv",
            Artifact {
                path: PathBuf::from("/tmp/out.mp4"),
                display_name: "clip.mp4".into(),
            },
            buffer,
            CancellationToken::new(),
        ))
    }

    fn snap(frame: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            frame,
            ..Default::default()
        }
    }

    fn done_payload() -> DonePayload {
        DonePayload {
            download: "/jobs/x/artifact".into(),
            name: "clip.mp4".into(),
        }
    }

    fn statuses(events: &[JobEvent]) -> Vec<String> {
        events
            .iter()
            .filter(|e| e.kind == EventKind::Status)
            .map(|e| e.data.clone())
            .collect()
    }

    #[test]
    fn lifecycle_rejects_illegal_moves() {
        let job = job(16);
        assert!(matches!(
            job.finish_done(&done_payload()),
            Err(Error::InvalidTransition { .. })
        ));

        job.mark_running().unwrap();
        assert!(job.mark_running().is_err());
        job.finish_error("boom").unwrap();

        assert!(job.finish_done(&done_payload()).is_err());
        assert!(job.finish_error("again").is_err());
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.error_text().as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn subscriber_sees_monotone_statuses_and_one_terminal() {
        let job = job(64);
        let sub = job.subscribe();

        job.mark_running().unwrap();
        for i in 0..10 {
            job.publish_progress(&snap(i));
        }
        job.finish_done(&done_payload()).unwrap();

        let events: Vec<JobEvent> = sub.collect().await;
        assert_eq!(statuses(&events), ["created", "running", "done"]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Done));
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::Progress).count(),
            10
        );
    }

    #[tokio::test]
    async fn late_subscriber_gets_final_status_only() {
        let job = job(16);
        job.mark_running().unwrap();
        job.finish_done(&done_payload()).unwrap();

        let events: Vec<JobEvent> = job.subscribe().collect().await;
        assert_eq!(events, [JobEvent::status(JobStatus::Done)]);
        assert_eq!(job.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn error_carries_diagnostics() {
        let job = job(16);
        let mut sub = job.subscribe();
        job.mark_running().unwrap();
        job.finish_error("ffmpeg failed: exit status: 1; stderr=No such file").unwrap();

        let mut last = None;
        while let Some(ev) = sub.recv().await {
            last = Some(ev);
        }
        let last = last.unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert!(last.data.contains("No such file"));
    }

    #[test]
    fn slow_subscriber_drops_fast_subscriber_gets_all() {
        let job = job(16);
        job.mark_running().unwrap();
        let mut slow = job.subscribe();
        let mut fast = job.subscribe();

        let mut fast_events = Vec::new();
        for i in 0..100 {
            assert!(job.publish_progress(&snap(i)));
            while let Some(ev) = fast.try_recv() {
                fast_events.push(ev);
            }
        }
        job.finish_done(&done_payload()).unwrap();
        while let Some(ev) = fast.try_recv() {
            fast_events.push(ev);
        }

        let mut slow_events = Vec::new();
        while let Some(ev) = slow.try_recv() {
            slow_events.push(ev);
        }

        let count = |events: &[JobEvent]| {
            events
                .iter()
                .filter(|e| e.kind == EventKind::Progress)
                .count() as u64
        };
        assert_eq!(count(&fast_events), 100);
        assert_eq!(fast.dropped(), 0);

        let slow_progress = count(&slow_events);
        assert!(slow_events.len() <= 16);
        assert!(slow_progress <= 16);
        assert_eq!(slow.dropped(), 100 - slow_progress);
        assert_eq!(slow_events.last().map(|e| e.kind), Some(EventKind::Done));

        // Delivered progress keeps decode order.
        let frames: Vec<u64> = slow_events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .map(|e| {
                let payload: serde_json::Value = serde_json::from_str(&e.data).unwrap();
                payload["frame"].as_u64().unwrap()
            })
            .collect();
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn progress_outside_running_is_ignored() {
        let job = job(16);
        assert!(!job.publish_progress(&snap(1)));
        job.mark_running().unwrap();
        job.finish_done(&done_payload()).unwrap();
        assert!(!job.publish_progress(&snap(2)));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let job = job(16);
        let a = job.subscribe();
        let b = job.subscribe();
        assert_eq!(job.subscriber_count(), 2);

        drop(a);
        assert_eq!(job.subscriber_count(), 1);
        b.unsubscribe();
        assert_eq!(job.subscriber_count(), 0);
    }

    #[test]
    fn subscription_outliving_job_is_harmless() {
        let job = job(16);
        let sub = job.subscribe();
        drop(job);
        drop(sub);
    }

    #[test]
    fn cancel_marks_token() {
        let job = job(16);
        assert!(!job.is_cancelled());
        job.cancel();
        assert!(job.cancel_token().is_cancelled());
    }
}
