// src/core/coordinator.rs

//! Binds a server's lifecycle to the lifecycle of its connections.
//!
//! The coordinator keeps a registry of weak references to the connections a
//! server has accepted. When the server is asked to close, every registered
//! connection is told to terminate; each one then closes as soon as it has no
//! request in flight. Connections accepted after the close request are
//! terminated right at accept time, since they missed the broadcast.

use crate::connection::{Connection, ConnectionGuard, ConnectionId, HandshakeGuard};
use crate::core::{KeepDrainError, metrics};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Registry {
    termination_requested: bool,
    connections: HashMap<ConnectionId, Weak<Connection>>,
    /// Connections still in their TLS handshake, not yet registered.
    handshakes: usize,
}

impl Registry {
    fn is_drained(&self) -> bool {
        self.termination_requested && self.connections.is_empty() && self.handshakes == 0
    }
}

/// Drain coordinator owned by one server instance.
pub struct DrainCoordinator {
    registry: Mutex<Registry>,
    /// Broadcast to whatever is accepting connections: stop accepting.
    shutdown_tx: broadcast::Sender<()>,
    drained: Notify,
}

impl DrainCoordinator {
    pub fn new() -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            shutdown_tx,
            drained: Notify::new(),
        })
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns the guard that deregisters the connection when it is dropped;
    /// the connection task must hold it for as long as the socket is open.
    /// Each id has at most one guard: registering an id that already has an
    /// entry fails with `AlreadyRegistered` and leaves that entry untouched.
    /// If the server is already terminating, the connection is terminated
    /// before this returns.
    pub fn on_accept(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
    ) -> Result<ConnectionGuard, KeepDrainError> {
        let id = connection.id();
        let server_terminating = {
            let mut registry = self.registry.lock();
            if registry.connections.contains_key(&id) {
                warn!("{} is already registered, refusing a second registration.", id);
                return Err(KeepDrainError::AlreadyRegistered { connection: id });
            }
            registry
                .connections
                .insert(id, Arc::downgrade(connection));
            registry.termination_requested
        };
        metrics::CONNECTED_CLIENTS.inc();

        if server_terminating {
            debug!(
                "{} accepted after the server began closing, terminating it immediately.",
                id
            );
            connection.request_termination();
        }
        Ok(ConnectionGuard::new(self.clone(), id, connection.peer_addr()))
    }

    /// Counts a connection whose TLS handshake is in progress, so the server
    /// is not reported drained before it either registers or fails.
    pub fn begin_handshake(self: &Arc<Self>) -> HandshakeGuard {
        self.registry.lock().handshakes += 1;
        HandshakeGuard::new(self.clone())
    }

    pub(crate) fn on_handshake_finished(&self) {
        let now_drained = {
            let mut registry = self.registry.lock();
            registry.handshakes = registry.handshakes.saturating_sub(1);
            registry.is_drained()
        };
        if now_drained {
            self.drained.notify_waiters();
        }
    }

    pub fn pending_handshakes(&self) -> usize {
        self.registry.lock().handshakes
    }

    /// Removes a connection's association. Returns false if it was already gone.
    pub fn on_connection_closed(&self, id: ConnectionId) -> bool {
        let (removed, now_drained) = {
            let mut registry = self.registry.lock();
            let removed = registry.connections.remove(&id).is_some();
            (removed, registry.is_drained())
        };
        if removed {
            metrics::CONNECTED_CLIENTS.dec();
        }
        if now_drained {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Handles a server close request.
    ///
    /// Runs the underlying close procedure (tells the accept loop to stop),
    /// marks the server terminated and signals every connection currently
    /// registered. Safe to call repeatedly: the close procedure runs again
    /// and connections that were already told to terminate ignore the repeat.
    /// Returns how many live connections were signalled.
    pub fn on_server_close(&self) -> usize {
        if self.shutdown_tx.send(()).is_err() {
            debug!("No accept loop is listening for the close request.");
        }

        let (connections, first_request, drained) = {
            let mut registry = self.registry.lock();
            let first_request = !registry.termination_requested;
            registry.termination_requested = true;
            let live: Vec<Arc<Connection>> = registry
                .connections
                .values()
                .filter_map(Weak::upgrade)
                .collect();
            (live, first_request, registry.is_drained())
        };

        if first_request {
            info!(
                "Server close requested, draining {} connection(s).",
                connections.len()
            );
            metrics::DRAINING.set(1.0);
        } else {
            debug!(
                "Server close requested again, re-signalling {} connection(s).",
                connections.len()
            );
        }

        for connection in &connections {
            connection.request_termination();
        }
        if drained {
            self.drained.notify_waiters();
        }
        connections.len()
    }

    pub fn is_termination_requested(&self) -> bool {
        self.registry.lock().termination_requested
    }

    pub fn active_connections(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Looks up a registered connection, if it is still alive.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.registry
            .lock()
            .connections
            .get(&id)
            .and_then(Weak::upgrade)
    }

    /// Receiver for the underlying close procedure. Subscribe before the
    /// close request can happen, or check `is_termination_requested` too.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resolves once the server has been asked to close, every connection has
    /// deregistered and no TLS handshake is still pending. Never resolves if
    /// the server is never closed.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let registry = self.registry.lock();
                if registry.is_drained() {
                    return;
                }
            }
            notified.await;
        }
    }
}
