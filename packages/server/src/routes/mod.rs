//! Route definitions, one module per resource.

pub mod assets;
pub mod events;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Everything mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(jobs::router())
        .merge(assets::router())
        .merge(events::router())
}
