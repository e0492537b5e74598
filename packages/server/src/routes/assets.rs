//! Gallery of produced images in the assets directory.

use std::path::Path as FsPath;
use std::time::SystemTime;

use axum::extract::{Path, State};
use axum::{Json, Router, routing::delete, routing::get};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Serialize)]
pub struct AssetEntry {
    pub name: String,
    pub url: String,
    pub path: String,
}

/// GET /api/assets
///
/// Images in the assets directory, newest first. A missing directory is an
/// empty gallery.
async fn list_assets(State(state): State<AppState>) -> AppResult<Json<Vec<AssetEntry>>> {
    let dir = &state.config.assets_dir;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Json(Vec::new())),
        Err(e) => return Err(AppError::InternalError(format!("Failed to list assets: {e}"))),
    };

    let mut found: Vec<(SystemTime, String)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to list assets: {e}")))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_image(&name) {
            continue;
        }
        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Skipping unreadable asset");
                continue;
            }
        };
        found.push((modified, name));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let assets = found
        .into_iter()
        .map(|(_, name)| AssetEntry {
            url: format!("/assets/{name}"),
            path: dir.join(&name).display().to_string(),
            name,
        })
        .collect();
    Ok(Json(assets))
}

/// DELETE /api/assets/{filename}
async fn delete_asset(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Json<Value>> {
    if !is_plain_file_name(&filename) {
        return Err(AppError::BadRequest("Invalid filename".into()));
    }

    let path = state.config.assets_dir.join(&filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            tracing::info!(file = %filename, "Deleted asset");
            Ok(Json(json!({
                "status": "success",
                "message": format!("Deleted {filename}"),
            })))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::NotFound("File not found".into()))
        }
        Err(e) => Err(AppError::InternalError(format!(
            "Failed to delete {filename}: {e}"
        ))),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assets", get(list_assets))
        .route("/assets/{filename}", delete(delete_asset))
}

fn is_image(name: &str) -> bool {
    FsPath::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| ext.eq_ignore_ascii_case(i)))
}

/// Rejects anything that could name a file outside the assets directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains(['/', '\\'])
}
