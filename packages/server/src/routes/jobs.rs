//! Job submission and polling endpoints.

use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get, routing::post};
use render_actors::QueueOverview;
use render_core::{EditRequest, GenerateRequest, Job, JobId, JobRequest};
use serde::Serialize;
use ulid::Ulid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Returned by both submit endpoints; the client polls `/api/job/{job_id}`.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl From<&Job> for SubmitResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status.as_str(),
            position: job.position,
        }
    }
}

/// POST /api/generate
async fn submit_generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let job_id = state.scheduler.submit(JobRequest::Generate(request)).await?;
    let job = state.scheduler.get_job(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job))))
}

/// POST /api/edit
///
/// Multipart form: an `image` file plus `prompt` and optional tuning fields.
/// The upload is only written to disk once the request has validated.
/// Fails with 503 when no edit command is configured.
async fn submit_edit(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    if !state.config.edit_enabled() {
        return Err(AppError::Unavailable(
            "image editing is not configured (set EDIT_PROGRAM)".into(),
        ));
    }
    let mut form = EditForm::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let file_name = field.file_name().unwrap_or("upload.png").to_string();
            let data = field.bytes().await?;
            form.image = Some((file_name, data.to_vec()));
        } else {
            let value = field.text().await?;
            form.set(&name, value)?;
        }
    }

    let (file_name, data) = form
        .image
        .take()
        .filter(|(_, data)| !data.is_empty())
        .ok_or_else(|| AppError::BadRequest("an image file is required".into()))?;
    let upload_path = state
        .config
        .uploads_dir
        .join(format!("{}_{}", Ulid::new(), sanitize_file_name(&file_name)));

    let request = JobRequest::Edit(form.into_request(upload_path.clone())?);
    request.validate()?;

    write_upload(&upload_path, &data).await?;
    match state.scheduler.submit(request).await {
        Ok(job_id) => {
            let job = state.scheduler.get_job(job_id).await?;
            Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job))))
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&upload_path).await;
            Err(e.into())
        }
    }
}

/// GET /api/job/{id}
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Job>> {
    Ok(Json(state.scheduler.get_job_str(&id).await?))
}

/// GET /api/queue
async fn queue_overview(State(state): State<AppState>) -> Json<QueueOverview> {
    Json(state.scheduler.overview().await)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(submit_generate))
        .route("/edit", post(submit_edit))
        .route("/job/{id}", get(get_job))
        .route("/queue", get(queue_overview))
}

/// Text fields of the edit form, collected before the request is built.
#[derive(Default)]
struct EditForm {
    image: Option<(String, Vec<u8>)>,
    prompt: Option<String>,
    negative_prompt: Option<String>,
    strength: Option<f32>,
    steps: Option<u32>,
    guidance: Option<f32>,
    seed: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    max_side: Option<u32>,
}

impl EditForm {
    fn set(&mut self, name: &str, value: String) -> AppResult<()> {
        if value.trim().is_empty() {
            return Ok(());
        }
        match name {
            "prompt" => self.prompt = Some(value),
            "negative_prompt" => self.negative_prompt = Some(value),
            "strength" => self.strength = Some(parse_field(name, &value)?),
            "steps" => self.steps = Some(parse_field(name, &value)?),
            "guidance" => self.guidance = Some(parse_field(name, &value)?),
            "seed" => self.seed = Some(parse_field(name, &value)?),
            "width" => self.width = Some(parse_field(name, &value)?),
            "height" => self.height = Some(parse_field(name, &value)?),
            "max_side" => self.max_side = Some(parse_field(name, &value)?),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
        Ok(())
    }

    fn into_request(self, input_image: PathBuf) -> AppResult<EditRequest> {
        let prompt = self
            .prompt
            .ok_or_else(|| AppError::BadRequest("prompt is required".into()))?;
        let mut request = EditRequest::new(prompt, input_image);
        request.negative_prompt = self.negative_prompt;
        if let Some(strength) = self.strength {
            request.strength = strength;
        }
        if self.max_side.is_some() {
            request.max_side = self.max_side;
        }
        request.steps = self.steps;
        request.guidance = self.guidance;
        request.width = self.width;
        request.height = self.height;
        if self.seed.is_some() {
            request.seed = self.seed;
        }
        Ok(request)
    }
}

fn parse_field<T: FromStr>(name: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{name} has invalid value '{value}'")))
}

/// Keep the last path component and replace anything unusual.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    let clean = clean.trim_start_matches('.');
    if clean.is_empty() {
        "upload.png".to_string()
    } else {
        clean.to_string()
    }
}

async fn write_upload(path: &FsPath, data: &[u8]) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::InternalError(format!("Failed to create uploads dir: {e}")))?;
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to store upload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_uploaded_names() {
        assert_eq!(sanitize_file_name("photo.png"), "photo.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\cat pic.jpg"), "cat_pic.jpg");
        assert_eq!(sanitize_file_name(".."), "upload.png");
        assert_eq!(sanitize_file_name(""), "upload.png");
    }

    #[test]
    fn edit_form_keeps_defaults_for_missing_fields() {
        let mut form = EditForm::default();
        form.set("prompt", "make it blue".into()).unwrap();
        form.set("strength", "".into()).unwrap();
        form.set("steps", "12".into()).unwrap();

        let request = form.into_request(PathBuf::from("uploads/x.png")).unwrap();
        assert_eq!(request.prompt, "make it blue");
        assert_eq!(request.strength, 0.6);
        assert_eq!(request.steps, Some(12));
        assert_eq!(request.max_side, Some(768));
        assert_eq!(request.seed, Some(42));
    }

    #[test]
    fn edit_form_rejects_garbage_numbers() {
        let mut form = EditForm::default();
        assert!(matches!(
            form.set("guidance", "lots".into()),
            Err(AppError::BadRequest(_))
        ));
    }
}
