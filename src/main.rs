// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::window_service::WindowService;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::influx_repository::InfluxRepository;
use crate::infrastructure::memory_cache::MemoryCacheStore;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{fetch_window, health_check, invalidate_series, plan_window};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_app_config()?;

    // Create repository and cache (infrastructure layer)
    let repository = Arc::new(InfluxRepository::new(config.influx.clone()));
    let cache = Arc::new(MemoryCacheStore::new(config.cache.max_entries));

    // Create services (application layer)
    let window_service = WindowService::new(
        repository.clone(),
        repository,
        cache,
        config.window.clone(),
    );

    let state = Arc::new(AppState { window_service });

    // Build router (presentation layer)
    // Note: bodies are compressed in the response helpers, so there is no CompressionLayer
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/wells/:well_id/curves/:metric/window", get(fetch_window))
        .route("/wells/:well_id/curves/:metric/plan", get(plan_window))
        .route(
            "/wells/:well_id/curves/:metric/invalidate",
            post(invalidate_series),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_addr))?;
    tracing::info!("Starting welllog-window service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
