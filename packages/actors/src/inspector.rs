//! Queue position and status views derived from the job store.
//!
//! Positions come from `(submitted_at, sequence)` order plus the current
//! marker; the submission channel itself is never inspected.

use std::sync::Arc;

use render_core::{Job, JobId, QueueError};
use serde::Serialize;

use crate::queue::SubmissionQueue;
use crate::store::JobStore;
use crate::worker_actor::CurrentJob;

/// Aggregate view of the queue for polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct QueueOverview {
    /// Job the worker is running, if any.
    pub current: Option<JobId>,
    /// Ids waiting in the submission queue (approximate).
    pub depth: usize,
    /// Queued and processing jobs, oldest first, with positions.
    pub jobs: Vec<Job>,
}

/// Read-only view over the store and the current marker.
#[derive(Clone)]
pub struct QueueInspector {
    store: Arc<JobStore>,
    current: CurrentJob,
    queue: SubmissionQueue,
}

impl QueueInspector {
    pub fn new(store: Arc<JobStore>, current: CurrentJob, queue: SubmissionQueue) -> Self {
        Self {
            store,
            current,
            queue,
        }
    }

    /// A job with its position recomputed.
    pub async fn status_of(&self, id: JobId) -> Result<Job, QueueError> {
        let mut job = self.store.get(id).await?;
        if !job.status.is_active() {
            job.position = None;
            return Ok(job);
        }

        let current = *self.current.read().await;
        let active = active_in_order(self.store.list().await);
        job.position = Some(position_of(&job, &active, current));
        Ok(job)
    }

    /// All queued and processing jobs, oldest first, each with its position.
    pub async fn snapshot(&self) -> Vec<Job> {
        let current = *self.current.read().await;
        let active = active_in_order(self.store.list().await);
        with_positions(active, current)
    }

    pub async fn overview(&self) -> QueueOverview {
        let current = *self.current.read().await;
        let active = active_in_order(self.store.list().await);
        QueueOverview {
            current,
            depth: self.queue.size(),
            jobs: with_positions(active, current),
        }
    }
}

fn active_in_order(jobs: Vec<Job>) -> Vec<Job> {
    let mut active: Vec<Job> = jobs
        .into_iter()
        .filter(|job| job.status.is_active())
        .collect();
    active.sort_by_key(Job::order_key);
    active
}

fn is_running(job: &Job, current: Option<JobId>) -> bool {
    current == Some(job.id) || matches!(job.status, render_core::JobStatus::Processing { .. })
}

/// 0 when running; otherwise the number of active jobs ahead of it.
fn position_of(job: &Job, active: &[Job], current: Option<JobId>) -> usize {
    if is_running(job, current) {
        return 0;
    }
    let key = job.order_key();
    active
        .iter()
        .filter(|other| other.id != job.id && (other.order_key() < key || is_running(other, current)))
        .count()
}

fn with_positions(active: Vec<Job>, current: Option<JobId>) -> Vec<Job> {
    let positions: Vec<usize> = active
        .iter()
        .map(|job| position_of(job, &active, current))
        .collect();
    active
        .into_iter()
        .zip(positions)
        .map(|(mut job, position)| {
            job.position = Some(position);
            job
        })
        .collect()
}
