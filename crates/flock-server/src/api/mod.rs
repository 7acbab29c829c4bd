//! HTTP Status API
//!
//! Read-only surface served on `status_addr`:
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `status`: Node mode and adopted nodes

mod health;
mod metrics;
mod state;
mod status;

pub use state::AppState;
pub use status::StatusResponse;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Node state
        .route("/status", get(status::get_status))
        .with_state(state)
}

/// Bind `addr` and serve the router until `shutdown` flips to true.
///
/// Returns the server task and the bound address.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<(JoinHandle<()>, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    info!(addr = %bound, "Status API listening");

    let app = create_router(state);
    let handle = tokio::spawn(async move {
        let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Err(e) = graceful.await {
            warn!(error = %e, "Status API server failed");
        }
    });
    Ok((handle, bound))
}
