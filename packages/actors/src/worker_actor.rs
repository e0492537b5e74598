//! Worker actor that executes jobs one at a time.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use render_core::{Artifact, InferenceError, Job, JobEvent, JobId, JobStatus};
use tokio::sync::{RwLock, broadcast};

use crate::inference::{InferenceBackend, ModeTable};
use crate::messages::WorkerMessage;
use crate::queue::SubmissionReceiver;
use crate::store::JobStore;

/// Marker for the job the worker is running right now.
pub type CurrentJob = Arc<RwLock<Option<JobId>>>;

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub receiver: SubmissionReceiver,
    pub store: Arc<JobStore>,
    pub current: CurrentJob,
    pub backend: Arc<dyn InferenceBackend>,
    pub modes: Arc<ModeTable>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    receiver: SubmissionReceiver,
    store: Arc<JobStore>,
    current: CurrentJob,
    backend: Arc<dyn InferenceBackend>,
    modes: Arc<ModeTable>,
    event_tx: broadcast::Sender<JobEvent>,
    /// Jobs finished since start, whatever the outcome.
    pub processed: u64,
}

impl WorkerActorState {
    fn new(args: WorkerArgs) -> Self {
        Self {
            worker_id: args.worker_id,
            receiver: args.receiver,
            store: args.store,
            current: args.current,
            backend: args.backend,
            modes: args.modes,
            event_tx: args.event_tx,
            processed: 0,
        }
    }

    fn broadcast(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Run one job from `queued` to a terminal state.
    ///
    /// Nothing that goes wrong here escapes: failures are recorded on the job
    /// or logged, and the worker moves on.
    async fn process(&mut self, job_id: JobId) {
        *self.current.write().await = Some(job_id);

        let started_at = Utc::now();
        let job = match self
            .store
            .transition(job_id, JobStatus::Processing { started_at })
            .await
        {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Could not start job");
                *self.current.write().await = None;
                return;
            }
        };

        tracing::info!(%job_id, kind = %job.kind, worker = %self.worker_id, "Job started");
        self.broadcast(JobEvent::JobStarted {
            job_id,
            kind: job.kind,
            timestamp: started_at,
        });

        let clock = Instant::now();
        let outcome = self.run_inference(&job).await;
        let duration_ms = clock.elapsed().as_millis() as u64;
        let now = Utc::now();

        match outcome {
            Ok(result) => {
                let status = JobStatus::Completed {
                    started_at,
                    completed_at: now,
                    result: result.clone(),
                };
                match self.store.transition(job_id, status).await {
                    Ok(_) => {
                        tracing::info!(%job_id, duration_ms, url = %result.url, "Job completed");
                        self.broadcast(JobEvent::JobCompleted {
                            job_id,
                            result,
                            duration_ms,
                            timestamp: now,
                        });
                    }
                    Err(e) => tracing::error!(%job_id, error = %e, "Failed to record completion"),
                }
            }
            Err(error) => {
                let error = error.to_string();
                let status = JobStatus::Failed {
                    started_at,
                    failed_at: now,
                    error: error.clone(),
                };
                match self.store.transition(job_id, status).await {
                    Ok(_) => {
                        tracing::warn!(%job_id, duration_ms, %error, "Job failed");
                        self.broadcast(JobEvent::JobFailed {
                            job_id,
                            error,
                            duration_ms,
                            timestamp: now,
                        });
                    }
                    Err(e) => tracing::error!(%job_id, error = %e, "Failed to record failure"),
                }
            }
        }

        self.cleanup(&job);
        self.processed += 1;
        *self.current.write().await = None;
    }

    /// Call the collaborator on the blocking pool; a panic becomes a failure.
    async fn run_inference(&self, job: &Job) -> Result<Artifact, InferenceError> {
        let plan = self.modes.plan(&job.request);
        tracing::debug!(job_id = %job.id, mode = plan.mode(), "Running inference");

        let backend = Arc::clone(&self.backend);
        match tokio::task::spawn_blocking(move || plan.run(backend.as_ref())).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(InferenceError::Panicked(panic_message(join_err))),
        }
    }

    /// Best-effort release of the job's temporary inputs, off the async runtime.
    fn cleanup(&self, job: &Job) {
        let backend = Arc::clone(&self.backend);
        let request = job.request.clone();
        let job_id = job.id;
        tokio::task::spawn_blocking(move || {
            backend.cleanup(&request);
            tracing::debug!(%job_id, "Cleaned up job inputs");
        });
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                (*msg).to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

/// Worker actor that drains the submission queue.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState::new(args))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Next)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Next => match state.receiver.dequeue().await {
                Some(job_id) => {
                    state.process(job_id).await;
                    myself.send_message(WorkerMessage::Next)?;
                }
                None => {
                    tracing::info!(
                        "Submission queue closed, stopping worker {} after {} jobs",
                        state.worker_id,
                        state.processed
                    );
                    myself.stop(None);
                }
            },
        }

        Ok(())
    }
}
