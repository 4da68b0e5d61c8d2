// Declare the modules
pub mod catalog;
pub mod codec;
pub mod commands;
pub mod config;
pub mod document;
pub mod gateway;
pub mod language;
#[cfg(feature = "llama")]
pub mod llama;
pub mod local;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod state;
pub mod store;
pub mod translation;

use anyhow::Context;
use clap::Parser;
use config::Settings;
use state::AppState;

/// Parses settings, wires the application state and serves HTTP until the
/// process is stopped.
pub async fn run() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let settings = Settings::parse();
    log::info!("Starting chatdesk on {}", settings.bind);

    // Loading a local model blocks for a while, keep it off the runtime.
    let build_settings = settings.clone();
    let app_state = tokio::task::spawn_blocking(move || AppState::from_settings(&build_settings))
        .await
        .context("Application setup task failed")??;

    let app = commands::router(app_state);
    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind))?;
    log::info!("Listening on http://{}", settings.bind);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
