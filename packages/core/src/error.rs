//! Error taxonomy shared by the queue and its collaborators.

use thiserror::Error;

use crate::JobId;

/// Errors surfaced synchronously to callers of the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// An id that could never have been issued (not a valid ULID).
    #[error("Job not found: {0}")]
    UnknownId(String),

    #[error("Duplicate job id: {0}")]
    DuplicateId(JobId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Queue is closed")]
    Closed,
}

impl QueueError {
    /// Whether this error means the job id is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_) | QueueError::UnknownId(_))
    }
}

/// Failures raised by the inference collaborator.
///
/// These never escape the worker; they end up as the `error` text of a
/// failed job.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Input the collaborator refused to work with.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Inference failed: {0}")]
    Internal(String),

    #[error("Inference panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
