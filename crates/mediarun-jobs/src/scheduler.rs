//! Timed eviction of finished jobs.
//!
//! Deadlines live in a min-heap keyed on `tokio::time::Instant`, so tests can
//! drive eviction with tokio's paused clock. A single loop sleeps until the
//! earliest deadline and is woken early when a nearer one is scheduled.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ids::JobId;
use crate::job::Job;
use crate::store::JobStore;

type Entry = Reverse<(Instant, u64, JobId)>;

#[derive(Debug, Default)]
pub struct EvictionScheduler {
    queue: Mutex<BinaryHeap<Entry>>,
    seq: AtomicU64,
    wake: Notify,
}

impl EvictionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict `id` once `after` has elapsed.
    pub fn schedule(&self, id: JobId, after: Duration) {
        let at = Instant::now() + after;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push(Reverse((at, seq, id)));
        self.wake.notify_one();
        tracing::debug!(job_id = %id, after_secs = after.as_secs(), "Eviction scheduled");
    }

    /// Remove and return every id whose deadline is at or before `now`, in
    /// deadline order.
    pub fn pop_due(&self, now: Instant) -> Vec<JobId> {
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        while let Some(Reverse((at, _, id))) = queue.peek() {
            if *at > now {
                break;
            }
            due.push(*id);
            queue.pop();
        }
        due
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.lock().peek().map(|Reverse((at, _, _))| *at)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Evict due jobs from `store` until `cancel` fires.
    pub async fn run(self: Arc<Self>, store: Arc<JobStore>, cancel: CancellationToken) {
        loop {
            for id in self.pop_due(Instant::now()) {
                evict(&store, &id);
            }

            let next = self.next_due();
            let sleep = async {
                match next {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = sleep => {}
            }
        }
        tracing::debug!("Eviction loop stopped");
    }
}

/// Remove `id` from `store` and delete its artifact.
///
/// Returns the evicted job, or `None` if it was already gone.
pub fn evict(store: &JobStore, id: &JobId) -> Option<Arc<Job>> {
    let job = store.remove(id)?;
    let path = &job.artifact().path;
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(job_id = %id, path = %path.display(), "Failed to delete artifact: {e}")
        }
    }
    tracing::debug!(job_id = %id, "Job evicted");
    Some(job)
}
