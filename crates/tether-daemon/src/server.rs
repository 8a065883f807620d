//! API server setup and routing

use anyhow::Result;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::auth::{self, AuthState};
use crate::state::AppState;
use crate::ws;

/// Run the API server plus the background engine tasks
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let auth_state = Arc::new(AuthState::new(state.config.auth.clone()));

    // View-level routes (dashboard reads, event stream)
    let view_routes = Router::new()
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{addr}", get(api::get_device))
        .route("/ws", get(ws::websocket_handler))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth::require_view,
        ));

    // Manage-level routes (registration lifecycle, change log, sweep)
    let manage_routes = Router::new()
        .route("/api/devices", post(api::register_device))
        .route("/api/devices/{addr}/complete", post(api::complete_registration))
        .route("/api/devices/{addr}", delete(api::forget_device))
        .route("/api/changes", get(api::list_changes))
        .route("/api/sweep", post(api::trigger_sweep))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth::require_manage,
        ));

    let app = Router::new()
        .route("/api/health", get(api::health))
        .merge(view_routes)
        .merge(manage_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    // Shutdown signal shared by the engine tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = state.reconciler.clone();
    let reconciler_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = reconciler.run(reconciler_shutdown).await {
            tracing::error!(error = %e, "Reconciler failed");
        }
    });

    let sweeper = state.sweeper();
    tokio::spawn(async move {
        if let Err(e) = sweeper.run(shutdown_rx).await {
            tracing::error!(error = %e, "Sweeper failed");
        }
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
