//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::QueueError;
use crate::request::{JobKind, JobRequest};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the image a completed job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Location clients fetch the artifact from, e.g. `/assets/output_....png`.
    pub url: String,
}

impl Artifact {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Current status of a job in its lifecycle.
///
/// The result only exists on `Completed` and the error only on `Failed`,
/// so a job can never carry both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the submission queue.
    #[default]
    Queued,
    /// Job is being executed by the worker.
    Processing { started_at: DateTime<Utc> },
    /// Job completed successfully.
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: Artifact,
    },
    /// Job failed with an error.
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    /// Check if the job is still waiting or running.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing { .. })
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing { .. } => "processing",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    /// The produced artifact, present only once completed.
    pub fn result(&self) -> Option<&Artifact> {
        match self {
            JobStatus::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    /// The failure description, present only once failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            JobStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    // queued = 0, processing = 1, completed/failed = 2
    fn stage(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing { .. } => 1,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } => 2,
        }
    }

    /// Whether `next` is the single forward step allowed from this status.
    pub fn can_advance_to(&self, next: &JobStatus) -> bool {
        next.stage() == self.stage() + 1
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job represents one requested generation or edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Which collaborator entry point handles this job.
    pub kind: JobKind,
    /// Caller-supplied parameters, never mutated after creation.
    pub request: JobRequest,
    /// Current status.
    #[serde(flatten)]
    pub status: JobStatus,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Submission order, breaks ties between equal timestamps.
    pub sequence: u64,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// Derived queue position, filled in on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(request: JobRequest, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind: request.kind(),
            request,
            status: JobStatus::Queued,
            submitted_at: now,
            sequence,
            updated_at: now,
            position: None,
        }
    }

    /// Move the job one step forward through its lifecycle.
    ///
    /// Anything other than `queued -> processing -> {completed|failed}` is
    /// rejected and leaves the job untouched.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), QueueError> {
        if !self.status.can_advance_to(&next) {
            return Err(QueueError::InvalidTransition {
                job_id: self.id,
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Key used for FIFO ordering.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.submitted_at, self.sequence)
    }

    /// When the job started processing, if it has.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Queued => None,
            JobStatus::Processing { started_at }
            | JobStatus::Completed { started_at, .. }
            | JobStatus::Failed { started_at, .. } => Some(*started_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenerateRequest;

    fn job() -> Job {
        Job::new(JobRequest::Generate(GenerateRequest::new("cat")), 0)
    }

    #[test]
    fn new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.kind, JobKind::Generate);
        assert!(job.status.result().is_none());
        assert!(job.status.error().is_none());
    }

    #[test]
    fn transitions_only_move_forward() {
        let mut job = job();
        let started_at = Utc::now();

        let skip = job.transition(JobStatus::Failed {
            started_at,
            failed_at: started_at,
            error: "boom".into(),
        });
        assert!(matches!(skip, Err(QueueError::InvalidTransition { .. })));
        assert_eq!(job.status, JobStatus::Queued);

        job.transition(JobStatus::Processing { started_at }).unwrap();
        assert!(job.transition(JobStatus::Queued).is_err());

        job.transition(JobStatus::Completed {
            started_at,
            completed_at: Utc::now(),
            result: Artifact::new("/assets/a.png"),
        })
        .unwrap();
        assert!(job.status.is_terminal());
        assert_eq!(job.status.result().map(|a| a.url.as_str()), Some("/assets/a.png"));

        // terminal states stay terminal
        let again = job.transition(JobStatus::Failed {
            started_at,
            failed_at: Utc::now(),
            error: "late".into(),
        });
        assert!(again.is_err());
        assert!(job.status.error().is_none());
    }

    #[test]
    fn serializes_flat_status_for_pollers() {
        let mut job = job();
        let started_at = Utc::now();
        job.transition(JobStatus::Processing { started_at }).unwrap();
        job.transition(JobStatus::Failed {
            started_at,
            failed_at: Utc::now(),
            error: "out of memory".into(),
        })
        .unwrap();

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "out of memory");
        assert_eq!(value["kind"], "generate");
        assert!(value.get("result").is_none());
        assert!(value.get("position").is_none());
    }
}
