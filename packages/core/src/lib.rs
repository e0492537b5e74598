//! Core domain types for the render queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and the request payloads for work items
//! - Artifact references produced by inference
//! - Events for real-time updates
//! - Error taxonomy for queue and inference failures

mod error;
mod events;
mod job;
mod request;

pub use error::{InferenceError, QueueError};
pub use events::JobEvent;
pub use job::{Artifact, Job, JobId, JobStatus};
pub use request::{EditRequest, GenerateRequest, JobKind, JobRequest};
