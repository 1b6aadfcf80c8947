// src/server/context.rs

use crate::config::Config;
use crate::core::DrainCoordinator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub config: Config,
    pub coordinator: Arc<DrainCoordinator>,
    pub listener: TcpListener,
    pub acceptor: Option<TlsAcceptor>,
    pub connection_permits: Arc<Semaphore>,
    /// Fires when the coordinator runs its close procedure.
    pub shutdown_rx: broadcast::Receiver<()>,
    /// Fires when the drain should be cut short.
    pub force_tx: broadcast::Sender<()>,
    pub force_rx: broadcast::Receiver<()>,
    /// Stops background tasks once every connection is gone.
    pub background_shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
