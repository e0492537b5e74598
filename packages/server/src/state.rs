use std::sync::Arc;

use render_actors::Scheduler;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The single-worker job scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Server configuration (upload directory, body limits).
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, config: ServerConfig) -> Self {
        Self {
            scheduler,
            config: Arc::new(config),
        }
    }
}
