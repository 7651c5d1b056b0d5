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
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::application::dashboard_service::DashboardService;
use crate::application::hook_registry::{ZoomHooks, ZOOM_TO_HOOK};
use crate::application::refresh_scheduler::RefreshScheduler;
use crate::domain::geometry::ZoomRequest;
use crate::infrastructure::config::load_dashboard_config;
use crate::infrastructure::http_repository::HttpDatasetRepository;
use crate::infrastructure::projection::WebMercatorProjection;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_dashboard, get_refresh, get_zoom, health_check, post_event, put_refresh, DASHBOARD_PATH,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Arc::new(load_dashboard_config().context("Failed to load dashboard configuration")?);

    // Create repository (infrastructure layer)
    let repository = Arc::new(HttpDatasetRepository::new(config.request_timeout())?);

    // The map widget's zoom hook publishes the latest request for polling
    let (zoom_tx, zoom_rx) = watch::channel::<Option<ZoomRequest>>(None);
    let hooks = Arc::new(ZoomHooks::new());
    hooks.register(ZOOM_TO_HOOK, move |request: &ZoomRequest| {
        zoom_tx.send_replace(Some(request.clone()));
    });

    // Create services (application layer)
    let scheduler = Arc::new(RefreshScheduler::new());
    let dashboard = Arc::new(DashboardService::new(
        config.clone(),
        repository,
        hooks.clone(),
        Arc::new(WebMercatorProjection),
        scheduler.subscribe(),
    ));
    dashboard.start();
    let refresh_sync = dashboard.spawn_refresh_sync();
    let zoom_sync = dashboard.spawn_zoom_sync();
    scheduler.select_interval(config.refresh.default_interval.clone());

    // Create application state
    let state = Arc::new(AppState {
        config: config.clone(),
        dashboard: dashboard.clone(),
        scheduler: scheduler.clone(),
        zoom: zoom_rx,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route(DASHBOARD_PATH, get(get_dashboard))
        .route("/dashboard/events", post(post_event))
        .route("/refresh", get(get_refresh).put(put_refresh))
        .route("/zoom", get(get_zoom))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr))?;
    tracing::info!("Starting statmap-dashboard service on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            return Err(e.into());
        }
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear down the session
    refresh_sync.abort();
    zoom_sync.abort();
    scheduler.stop();
    dashboard.shutdown();
    hooks.unregister(ZOOM_TO_HOOK);
    tracing::info!("Dashboard service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
