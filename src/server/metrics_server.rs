// src/server/metrics_server.rs

use crate::core::DrainCoordinator;
use crate::core::metrics::{DRAINING, gather_metrics};
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler(coordinator: Arc<DrainCoordinator>) -> impl IntoResponse {
    let draining = coordinator.is_termination_requested();
    DRAINING.set(if draining { 1.0 } else { 0.0 });

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
///
/// It keeps serving while connections drain and stops on `shutdown_rx`.
pub async fn run_metrics_server(
    coordinator: Arc<DrainCoordinator>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(move || metrics_handler(coordinator.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return Ok(());
        }
    };
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await?;
    Ok(())
}
