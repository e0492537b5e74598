//! Scheduler that owns the store, the submission queue and the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use ractor::{Actor, ActorRef};
use render_core::{Job, JobEvent, JobId, JobRequest, QueueError};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::inference::{InferenceBackend, ModeTable};
use crate::inspector::{QueueInspector, QueueOverview};
use crate::messages::WorkerMessage;
use crate::queue::{self, SubmissionQueue};
use crate::store::JobStore;
use crate::worker_actor::{CurrentJob, WorkerActor, WorkerArgs};

/// Tuning knobs for a scheduler instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Drop finished jobs older than this. `None` keeps them forever.
    pub retention: Option<Duration>,
    /// How often the retention sweep runs.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            retention: None,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Single-worker FIFO job scheduler.
///
/// Construct one with [`Scheduler::start`] and share it (usually behind an
/// `Arc`) between request handlers.
pub struct Scheduler {
    store: Arc<JobStore>,
    queue: SubmissionQueue,
    current: CurrentJob,
    inspector: QueueInspector,
    event_tx: broadcast::Sender<JobEvent>,
    sequence: AtomicU64,
    submit_lock: Mutex<()>,
    worker: ActorRef<WorkerMessage>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    janitor: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the worker and return a ready scheduler.
    pub async fn start(
        backend: Arc<dyn InferenceBackend>,
        modes: ModeTable,
        config: SchedulerConfig,
    ) -> Result<Self, ractor::SpawnErr> {
        let store = Arc::new(JobStore::new());
        let (queue, receiver) = queue::channel();
        let current: CurrentJob = Arc::new(RwLock::new(None));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let worker_id = format!("worker-{}", Ulid::new());
        let args = WorkerArgs {
            worker_id: worker_id.clone(),
            receiver,
            store: Arc::clone(&store),
            current: Arc::clone(&current),
            backend,
            modes: Arc::new(modes),
            event_tx: event_tx.clone(),
        };
        let (worker, worker_handle) = Actor::spawn(Some(worker_id), WorkerActor, args).await?;

        let janitor = config
            .retention
            .map(|retention| spawn_janitor(Arc::clone(&store), event_tx.clone(), retention, config.sweep_interval));

        let inspector = QueueInspector::new(Arc::clone(&store), Arc::clone(&current), queue.clone());

        Ok(Self {
            store,
            queue,
            current,
            inspector,
            event_tx,
            sequence: AtomicU64::new(0),
            submit_lock: Mutex::new(()),
            worker,
            worker_handle: Mutex::new(Some(worker_handle)),
            janitor,
        })
    }

    /// Validate, record and enqueue a new job. Returns immediately.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, QueueError> {
        request.validate()?;

        // Timestamp, insertion and enqueue happen under one lock so queue
        // order always matches submission order.
        let _guard = self.submit_lock.lock().await;
        if self.queue.is_closed() {
            return Err(QueueError::Closed);
        }
        let job = Job::new(request, self.sequence.fetch_add(1, Ordering::SeqCst));
        let job_id = job.id;
        self.store.put(job.clone()).await?;
        self.queue.enqueue(job_id)?;
        tracing::info!(%job_id, kind = %job.kind, depth = self.queue.size(), "Job queued");
        // Sent before the lock is released so no later event for this job
        // can reach subscribers first.
        let _ = self.event_tx.send(JobEvent::JobQueued {
            job,
            timestamp: Utc::now(),
        });
        drop(_guard);
        Ok(job_id)
    }

    /// Look up a job by id with its current queue position.
    pub async fn get_job(&self, id: JobId) -> Result<Job, QueueError> {
        self.inspector.status_of(id).await
    }

    /// Like [`get_job`](Self::get_job) but for an id straight off the wire.
    pub async fn get_job_str(&self, id: &str) -> Result<Job, QueueError> {
        let id = JobId::parse(id).map_err(|_| QueueError::UnknownId(id.to_string()))?;
        self.get_job(id).await
    }

    /// Queued and processing jobs, oldest first, with positions.
    pub async fn list_active_jobs(&self) -> Vec<Job> {
        self.inspector.snapshot().await
    }

    pub async fn overview(&self) -> QueueOverview {
        self.inspector.overview().await
    }

    /// Every job the store still holds, in no particular order.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.list().await
    }

    pub async fn current_job(&self) -> Option<JobId> {
        *self.current.read().await
    }

    /// Ids waiting for the worker. Approximate under concurrency.
    pub fn queue_depth(&self) -> usize {
        self.queue.size()
    }

    pub fn inspector(&self) -> &QueueInspector {
        &self.inspector
    }

    /// Receive every job event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<JobEvent> {
        self.event_tx.clone()
    }

    pub fn is_accepting_jobs(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Stop accepting jobs and wait for the worker to finish its current one.
    ///
    /// Jobs still queued stay `queued`; nothing is persisted.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down scheduler");
        // Closed under the submission lock so a submit is either fully
        // enqueued or rejected.
        let _guard = self.submit_lock.lock().await;
        self.queue.close();
        drop(_guard);
        if let Some(janitor) = &self.janitor {
            janitor.abort();
        }
        if let Some(handle) = self.worker_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Worker task ended abnormally: {}", e);
            }
        }
        tracing::info!(
            worker = %self.worker.get_id(),
            remaining = self.queue.size(),
            "Scheduler stopped"
        );
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(janitor) = &self.janitor {
            janitor.abort();
        }
    }
}

/// Periodically drop terminal jobs that fell out of the retention window.
fn spawn_janitor(
    store: Arc<JobStore>,
    event_tx: broadcast::Sender<JobEvent>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
                continue;
            };
            let count = store.evict_terminal(cutoff).await;
            if count > 0 {
                tracing::info!(count, "Evicted finished jobs past retention");
                let _ = event_tx.send(JobEvent::JobsEvicted {
                    count,
                    timestamp: Utc::now(),
                });
            }
        }
    })
}
