use std::sync::Arc;

use render_actors::Scheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use render_server::config::ServerConfig;
use render_server::inference::CommandBackend;
use render_server::router::build_app_router;
use render_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "render_server=info,render_actors=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    let addr = config.bind_addr()?;
    tracing::info!(
        %addr,
        program = %config.inference_program,
        edit_program = config.edit_program.as_deref().unwrap_or("none"),
        edit_model = config.edit_model_id.as_deref().unwrap_or("none (img2img)"),
        "Loaded server configuration"
    );

    if !config.edit_enabled() {
        tracing::warn!("EDIT_PROGRAM is not set, POST /api/edit will answer 503");
    }

    // --- Scheduler ---
    let backend = Arc::new(CommandBackend::from_config(&config));
    let scheduler = Arc::new(
        Scheduler::start(backend, config.mode_table(), config.scheduler_config()).await?,
    );
    tracing::info!("Scheduler started");

    // --- Router ---
    let app = build_app_router(AppState::new(Arc::clone(&scheduler), config));

    // --- Start server ---
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, draining worker");
    scheduler.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
