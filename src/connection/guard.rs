// src/connection/guard.rs

//! RAII guards that report a connection's lifecycle to its drain coordinator:
//! `ConnectionGuard` for a registered connection and `HandshakeGuard` for one
//! still in its TLS handshake.

use super::state::ConnectionId;
use crate::core::coordinator::DrainCoordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Deregisters a connection from its coordinator when dropped.
///
/// Dropping the guard is the "connection closed" event: it must live exactly
/// as long as the transport, so the association is torn down once and only
/// once, no matter how the connection task exits.
pub struct ConnectionGuard {
    coordinator: Arc<DrainCoordinator>,
    id: ConnectionId,
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(coordinator: Arc<DrainCoordinator>, id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            coordinator,
            id,
            addr,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.coordinator.on_connection_closed(self.id) {
            debug!("{} ({}) closed and deregistered.", self.id, self.addr);
        } else {
            debug!(
                "{} ({}) was not registered upon cleanup.",
                self.id, self.addr
            );
        }
    }
}

/// Marks a TLS handshake as pending until dropped.
///
/// Drop it only after the connection has been registered (or the handshake
/// failed), so the coordinator never sees the connection as gone in between.
pub struct HandshakeGuard {
    coordinator: Arc<DrainCoordinator>,
}

impl HandshakeGuard {
    pub(crate) fn new(coordinator: Arc<DrainCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        self.coordinator.on_handshake_finished();
    }
}
