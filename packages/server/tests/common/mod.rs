#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use render_actors::{
    FnBackend, InferenceBackend, InferencePlan, ModeTable, Scheduler, SchedulerConfig,
};
use render_core::{Artifact, InferenceError};
use render_server::config::ServerConfig;
use render_server::router::build_app_router;
use render_server::state::AppState;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "render-test-boundary";

/// A running app plus the temp directory its uploads land in.
pub struct TestApp {
    pub router: Router,
    pub scheduler: Arc<Scheduler>,
    pub config: ServerConfig,
    pub dir: TempDir,
}

/// Build a test `ServerConfig` rooted in a temp directory.
pub fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        assets_dir: dir.path().join("assets"),
        uploads_dir: dir.path().join("uploads"),
        max_upload_bytes: 1024 * 1024,
        edit_program: Some("true".into()),
        ..ServerConfig::default()
    }
}

pub async fn build_test_app(backend: Arc<dyn InferenceBackend>) -> TestApp {
    build_test_app_with(backend, |_| {}).await
}

/// Like [`build_test_app`], with a chance to adjust the config first.
pub async fn build_test_app_with(
    backend: Arc<dyn InferenceBackend>,
    adjust: impl FnOnce(&mut ServerConfig),
) -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(&dir);
    adjust(&mut config);
    let scheduler = Arc::new(
        Scheduler::start(backend, ModeTable::default(), SchedulerConfig::default())
            .await
            .expect("scheduler starts"),
    );
    let router = build_app_router(AppState::new(Arc::clone(&scheduler), config.clone()));
    TestApp {
        router,
        scheduler,
        config,
        dir,
    }
}

/// Backend that records each plan and answers from the prompt.
pub fn recording_backend() -> (Arc<dyn InferenceBackend>, Arc<Mutex<Vec<InferencePlan>>>) {
    let plans = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&plans);
    let backend = FnBackend::shared(move |plan: &InferencePlan| {
        log.lock().unwrap().push(plan.clone());
        if plan.prompt() == "boom" {
            return Err(InferenceError::Internal("model exploded".into()));
        }
        Ok(Artifact::new(format!("/assets/{}.png", plan.mode())))
    });
    (backend, plans)
}

/// Backend whose calls block until the returned sender sends or is dropped.
pub fn gated_backend() -> (Arc<dyn InferenceBackend>, mpsc::Sender<()>) {
    let (release, wait) = mpsc::channel::<()>();
    let wait = Mutex::new(wait);
    let backend = FnBackend::shared(move |_plan: &InferencePlan| {
        let _ = wait.lock().unwrap().recv();
        Ok(Artifact::new("/assets/gated.png"))
    });
    (backend, release)
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, json: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// One part of a multipart body: `(name, Some(file_name), content)`.
pub type Part<'a> = (&'a str, Option<&'a str>, &'a str);

pub async fn post_multipart(app: &Router, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
            }
        }
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET /api/job/{id}` until the job is completed or failed.
pub async fn poll_until_done(app: &Router, job_id: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = get(app, &format!("/api/job/{job_id}")).await;
            assert_eq!(response.status(), StatusCode::OK);
            let job = body_json(response).await;
            if job["status"] == "completed" || job["status"] == "failed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job finished in time")
}
