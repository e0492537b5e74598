//! Single-worker job scheduler for image generation and editing.
//!
//! # Architecture
//!
//! - `Scheduler` - Owns the store, the submission queue and the worker
//! - `WorkerActor` - Drains the submission queue one job at a time
//! - `QueueInspector` - Read-only status and position views
//! - `InferenceBackend` - The collaborator that produces images
//!
//! # Usage
//!
//! ```ignore
//! use render_actors::{FnBackend, ModeTable, Scheduler, SchedulerConfig};
//!
//! let backend = FnBackend::shared(|plan| run_model(plan));
//! let scheduler = Scheduler::start(backend, ModeTable::default(), SchedulerConfig::default()).await?;
//!
//! let job_id = scheduler.submit(request).await?;
//! let job = scheduler.get_job(job_id).await?;
//! ```

mod inference;
mod inspector;
mod messages;
pub mod queue;
mod scheduler;
mod store;
mod worker_actor;

pub use inference::{
    EditMode, EditSize, FnBackend, GeneratePlan, GenerateSettings, Img2ImgPlan, Img2ImgSettings,
    InferenceBackend, InferencePlan, InferenceResult, InstructionEditPlan, InstructionEditSettings,
    ModeTable, floor_to_16,
};
pub use inspector::{QueueInspector, QueueOverview};
pub use messages::WorkerMessage;
pub use queue::{SubmissionQueue, SubmissionReceiver};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::JobStore;
pub use worker_actor::{CurrentJob, WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
