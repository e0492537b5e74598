#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use render_actors::{
    FnBackend, InferenceBackend, InferencePlan, InferenceResult, ModeTable, Scheduler,
    SchedulerConfig,
};
use render_core::{Artifact, GenerateRequest, InferenceError, Job, JobId, JobRequest};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn generate(prompt: &str) -> JobRequest {
    JobRequest::Generate(GenerateRequest::new(prompt))
}

/// Outcome keyed off the prompt: "boom" fails, "panic" panics.
fn outcome_for(plan: &InferencePlan) -> InferenceResult {
    match plan.prompt() {
        "boom" => Err(InferenceError::Internal("model exploded".into())),
        "panic" => panic!("backend panicked on purpose"),
        prompt => Ok(Artifact::new(format!("/assets/{prompt}.png"))),
    }
}

/// Backend that returns immediately and records the prompts it saw.
pub fn instant_backend() -> (Arc<dyn InferenceBackend>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let backend = FnBackend::shared(move |plan: &InferencePlan| {
        log.lock().unwrap().push(plan.prompt().to_string());
        outcome_for(plan)
    });
    (backend, seen)
}

/// Backend that holds every call until the test releases it.
///
/// Dropping the gate releases all pending and future calls.
pub struct Gate {
    release: mpsc::Sender<()>,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl Gate {
    pub fn release_one(&self) {
        let _ = self.release.send(());
    }
}

pub fn gated_backend() -> (Arc<dyn InferenceBackend>, Gate) {
    let (release, wait) = mpsc::channel::<()>();
    let wait = Mutex::new(wait);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let backend = FnBackend::shared(move |plan: &InferencePlan| {
        log.lock().unwrap().push(plan.prompt().to_string());
        let _ = wait.lock().unwrap().recv();
        outcome_for(plan)
    });
    (backend, Gate { release, seen })
}

pub async fn start(backend: Arc<dyn InferenceBackend>) -> Scheduler {
    start_with(backend, SchedulerConfig::default()).await
}

pub async fn start_with(backend: Arc<dyn InferenceBackend>, config: SchedulerConfig) -> Scheduler {
    Scheduler::start(backend, ModeTable::default(), config)
        .await
        .expect("scheduler starts")
}

/// Poll until the job satisfies `done` or the timeout expires.
pub async fn wait_for<F>(scheduler: &Scheduler, id: JobId, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let job = scheduler.get_job(id).await.expect("job exists");
            if done(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job reached the expected state in time")
}

pub async fn wait_terminal(scheduler: &Scheduler, id: JobId) -> Job {
    wait_for(scheduler, id, |job| job.status.is_terminal()).await
}
