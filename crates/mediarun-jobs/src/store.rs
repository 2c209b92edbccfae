//! Process-wide index of live jobs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ids::JobId;
use crate::job::Job;

/// Maps job ids to jobs under one mutex.
///
/// Removal hands back the store's reference, so a job can only be removed
/// once.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<Job>) {
        self.jobs.lock().insert(job.id(), job);
    }

    pub fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.lock().remove(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.lock().keys().copied().collect()
    }
}
