// src/server/handle.rs

use crate::core::DrainCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// A cloneable handle for stopping a running server.
///
/// `close` begins the drain: the listener stops accepting, idle connections
/// close immediately and busy ones close when their current request is done.
#[derive(Clone)]
pub struct ServerHandle {
    coordinator: Arc<DrainCoordinator>,
    force_tx: broadcast::Sender<()>,
}

impl ServerHandle {
    pub(crate) fn new(coordinator: Arc<DrainCoordinator>, force_tx: broadcast::Sender<()>) -> Self {
        Self {
            coordinator,
            force_tx,
        }
    }

    /// Begins draining. Returns how many connections were signalled.
    /// Calling it again is harmless.
    pub fn close(&self) -> usize {
        self.coordinator.on_server_close()
    }

    /// Alias of [`ServerHandle::close`].
    pub fn terminate(&self) -> usize {
        self.close()
    }

    /// Begins draining if needed, then aborts whatever is still running.
    pub fn force_shutdown(&self) {
        self.close();
        if self.force_tx.send(()).is_err() {
            warn!("Forced shutdown requested, but the server is no longer running.");
        }
    }

    pub fn is_termination_requested(&self) -> bool {
        self.coordinator.is_termination_requested()
    }

    pub fn active_connections(&self) -> usize {
        self.coordinator.active_connections()
    }

    pub fn coordinator(&self) -> &Arc<DrainCoordinator> {
        &self.coordinator
    }

    /// Resolves once the server is closing and every connection is gone,
    /// including connections still in their TLS handshake.
    pub async fn wait_drained(&self) {
        self.coordinator.wait_drained().await
    }
}
