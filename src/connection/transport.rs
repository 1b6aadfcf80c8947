// src/connection/transport.rs

//! The close primitive the drain layer invokes on a connection's transport.

use tokio::sync::broadcast;
use tracing::debug;

/// The transport side of a connection, as far as draining is concerned.
///
/// `close` is fire-and-forget: it must not block, must tolerate being called
/// on an already broken or already closed socket, and reports nothing back.
pub trait Transport: Send + Sync {
    /// Ends the write side gracefully, then releases the socket.
    fn close(&self);
}

/// A `Transport` for sockets owned by a connection task.
///
/// Closing sends on a per-connection channel; the task owning the stream
/// reacts by shutting down the write half and dropping the stream.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    tx: broadcast::Sender<()>,
}

impl KillSwitch {
    /// Creates the switch and the receiver its connection task listens on.
    pub fn new() -> (Self, broadcast::Receiver<()>) {
        let (tx, rx) = broadcast::channel(1);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Transport for KillSwitch {
    fn close(&self) {
        if self.tx.send(()).is_err() {
            // The task is already gone, so the socket is already released.
            debug!("Close requested for a connection whose task has already exited.");
        }
    }
}
