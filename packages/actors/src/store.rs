//! In-memory job store keyed by job id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use render_core::{Job, JobId, JobStatus, QueueError};
use tokio::sync::RwLock;

/// Concurrent map from job id to job record.
///
/// A single lock guards the map; it is held only for the map access itself,
/// never across inference.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job. Fails if the id is already present.
    pub async fn put(&self, job: Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            tracing::error!(job_id = %job.id, "duplicate job id issued");
            return Err(QueueError::DuplicateId(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    /// Get a copy of a job by id.
    pub async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    /// Snapshot of every job, in no particular order.
    pub async fn list(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Apply a forward status transition and return the updated job.
    pub async fn transition(&self, id: JobId, next: JobStatus) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.transition(next)?;
        Ok(job.clone())
    }

    /// Drop terminal jobs last updated before `cutoff`. Returns how many went.
    pub async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
