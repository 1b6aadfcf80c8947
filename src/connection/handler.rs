// src/connection/handler.rs

//! Defines the `ConnectionHandler` which runs the keep-alive request loop of a
//! single client connection.

use super::accounting::{RequestContext, RequestGuard};
use super::guard::ConnectionGuard;
use super::state::{Connection, ConnectionId, TransportKind};
use super::transport::KillSwitch;
use crate::core::coordinator::DrainCoordinator;
use crate::core::{KeepDrainError, Service};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Serves one keep-alive connection until the peer leaves or the drain layer
/// closes it.
pub struct ConnectionHandler<T, S: Service> {
    framed: Framed<T, S::Codec>,
    connection: Arc<Connection>,
    kill_rx: broadcast::Receiver<()>,
    service: Arc<S>,
    // Declared last so it drops after the stream has been released.
    guard: ConnectionGuard,
}

impl<T, S> ConnectionHandler<T, S>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    S: Service,
{
    /// Builds the connection's drain state and registers it with `coordinator`.
    ///
    /// Call this at the protocol's "connection established" point: right after
    /// accept for plaintext, after the handshake for TLS. A server that is
    /// already closing terminates the connection immediately, in which case
    /// `run` exits on its first turn. Fails if `id` is already registered.
    pub fn accept(
        stream: T,
        id: ConnectionId,
        addr: SocketAddr,
        kind: TransportKind,
        coordinator: &Arc<DrainCoordinator>,
        service: Arc<S>,
    ) -> Result<Self, KeepDrainError> {
        let (kill_switch, kill_rx) = KillSwitch::new();
        let connection = Arc::new(Connection::new(id, addr, kind, kill_switch));
        let guard = coordinator.on_accept(&connection)?;
        debug!("{} ({}) registered over {:?}.", id, addr, connection.kind());
        Ok(Self {
            framed: Framed::new(stream, S::Codec::default()),
            connection,
            kill_rx,
            service,
            guard,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The main event loop for the connection.
    pub async fn run(mut self) -> Result<(), KeepDrainError> {
        let ctx = RequestContext::new(self.connection.clone());
        let id = self.guard.connection_id();
        let addr = self.connection.peer_addr();

        let result = loop {
            tokio::select! {
                // A close request always wins over reading the next request.
                biased;
                _ = self.kill_rx.recv() => {
                    debug!("{} ({}) closing on drain request.", id, addr);
                    break Ok(());
                }
                frame = self.framed.next() => match frame {
                    Some(Ok(request)) => {
                        let request_guard = RequestGuard::begin(&self.connection);
                        let response = self.service.call(request, &ctx).await;
                        if let Err(e) = self.framed.send(response).await {
                            // The guard drops here and settles the accounting.
                            break Err(e);
                        }
                        request_guard.finish();
                    }
                    Some(Err(e)) => {
                        if let Some(reply) = self.service.reject(&e)
                            && let Err(send_err) = self.framed.send(reply).await
                        {
                            debug!("Failed to send rejection to {} ({}): {}", id, addr, send_err);
                        }
                        break Err(e);
                    }
                    None => {
                        debug!("{} ({}) closed by peer.", id, addr);
                        break Ok(());
                    }
                }
            }
        };

        // End the write side gracefully; the socket is released when the
        // stream drops. Failures here mean the socket is already gone.
        if let Err(e) = self.framed.get_mut().shutdown().await {
            debug!("Shutdown of {} ({}) failed: {}", id, addr, e);
        }

        match result {
            Err(e) if e.is_normal_disconnect() => {
                debug!("{} ({}) disconnected: {}", id, addr, e);
                Ok(())
            }
            Err(e) => {
                warn!("{} ({}) terminated unexpectedly: {}", id, addr, e);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }
}
