// src/server/signals.rs

//! Turns SIGINT/SIGTERM into close requests.

use super::handle::ServerHandle;
use anyhow::{Result, anyhow};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Spawns a task that drains the server on the first SIGINT or SIGTERM and
/// forces shutdown on the second.
pub fn spawn_listener(handle: ServerHandle) -> Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received."),
                _ = sigterm.recv() => info!("SIGTERM received."),
            }
            if handle.is_termination_requested() {
                warn!("Second shutdown signal received, aborting remaining connections.");
                handle.force_shutdown();
                break;
            }
            info!("Initiating graceful shutdown. Send the signal again to force it.");
            handle.close();
        }
    }))
}
