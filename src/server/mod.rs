// src/server/mod.rs

use crate::config::Config;
use crate::core::Service;
use crate::core::commands::CommandService;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod connection_loop;
mod context;
mod handle;
mod initialization;
mod metrics_server;
mod signals;
mod spawner;
mod stream;

pub use handle::ServerHandle;
pub use stream::AnyStream;

/// A bound server that drains its keep-alive connections on close.
pub struct Server<S: Service> {
    ctx: context::ServerContext,
    service: Arc<S>,
}

impl<S: Service> Server<S> {
    /// Binds the listener and prepares TLS. Nothing is accepted until `run`.
    pub async fn bind(config: Config, service: S) -> Result<Self> {
        let ctx = initialization::setup(config).await?;
        Ok(Self {
            ctx,
            service: Arc::new(service),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.ctx.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(self.ctx.coordinator.clone(), self.ctx.force_tx.clone())
    }

    /// Serves connections until closed, then waits for them to drain.
    pub async fn run(mut self) -> Result<()> {
        spawner::spawn_all(&mut self.ctx);
        connection_loop::run(self.ctx, self.service).await;
        Ok(())
    }
}

/// The main server startup function used by the binary: serves the command
/// service and drains on SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let server = Server::bind(config, CommandService).await?;
    signals::spawn_listener(server.handle())?;
    server.run().await
}
