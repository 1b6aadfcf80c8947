// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and the drain
//! phase that follows a close request.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::{ConnectionHandler, ConnectionId};
use crate::core::{KeepDrainError, Service, metrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    Completed,
    TimedOut,
    Forced,
}

/// Accepts connections until the coordinator's close procedure runs, then
/// waits for every connection task to finish.
pub async fn run<S: Service>(mut ctx: ServerContext, service: Arc<S>) {
    let mut connection_id_counter: u64 = 0;
    let mut client_tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown_rx.recv() => {
                info!("Close requested, no longer accepting connections.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => {
                        error!("CRITICAL: Background task failed: {}. Shutting down.", e);
                        ctx.coordinator.on_server_close();
                        break;
                    }
                    Err(e) => {
                        error!("CRITICAL: Background task panicked: {e:?}. Shutting down.");
                        ctx.coordinator.on_server_close();
                        break;
                    }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                    warn!("Rejecting connection from {}: max_clients ({}) reached.", addr, ctx.config.max_clients);
                    metrics::CONNECTIONS_REJECTED_TOTAL.inc();
                    continue;
                };

                connection_id_counter = connection_id_counter.wrapping_add(1);
                let id = ConnectionId(connection_id_counter);
                let coordinator = ctx.coordinator.clone();
                let service = service.clone();
                debug!("Accepted new connection {} from {}", id, addr);

                if let Some(acceptor) = ctx.acceptor.clone() {
                    // Counted from here so a drain cannot finish between the
                    // handshake completing and the connection registering.
                    let handshake = coordinator.begin_handshake();
                    client_tasks.spawn(async move {
                        let _permit = permit;
                        match acceptor.accept(socket).await {
                            Ok(tls_stream) => {
                                debug!("TLS handshake successful for {addr}");
                                let stream = AnyStream::Tls(Box::new(tls_stream));
                                let kind = stream.kind();
                                let handler = ConnectionHandler::accept(stream, id, addr, kind, &coordinator, service);
                                drop(handshake);
                                serve(handler).await;
                            }
                            Err(e) => {
                                warn!("TLS handshake error for {addr}: {e}");
                            }
                        }
                    });
                } else {
                    client_tasks.spawn(async move {
                        let _permit = permit;
                        let stream = AnyStream::Tcp(socket);
                        let kind = stream.kind();
                        serve(ConnectionHandler::accept(stream, id, addr, kind, &coordinator, service)).await;
                    });
                }
            },

            Some(res) = client_tasks.join_next() => {
                log_task_result(res);
            },
        }
    }

    // Stop accepting: nothing new can arrive once the listener is gone.
    drop(ctx.listener);

    info!(
        "Draining {} connection(s) ({} task(s) still running).",
        ctx.coordinator.active_connections(),
        client_tasks.len()
    );

    let outcome = tokio::select! {
        _ = join_all(&mut client_tasks) => DrainOutcome::Completed,
        _ = drain_deadline(ctx.config.shutdown.drain_timeout) => DrainOutcome::TimedOut,
        _ = ctx.force_rx.recv() => DrainOutcome::Forced,
    };

    match outcome {
        DrainOutcome::Completed => info!("All client connections drained."),
        DrainOutcome::TimedOut => warn!(
            "Drain timeout elapsed, aborting {} connection task(s).",
            client_tasks.len()
        ),
        DrainOutcome::Forced => warn!(
            "Forced shutdown, aborting {} connection task(s).",
            client_tasks.len()
        ),
    }
    if outcome != DrainOutcome::Completed {
        client_tasks.shutdown().await;
    }
    metrics::DRAINING.set(0.0);

    if ctx.background_shutdown_tx.send(()).is_err() {
        debug!("No background tasks to stop.");
    }
    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}

async fn serve<S: Service>(
    handler: Result<ConnectionHandler<AnyStream, S>, KeepDrainError>,
) {
    match handler {
        Ok(handler) => {
            let _ = handler.run().await;
        }
        Err(e) => error!("Failed to register connection: {}", e),
    }
}

async fn join_all(client_tasks: &mut JoinSet<()>) {
    while let Some(res) = client_tasks.join_next().await {
        log_task_result(res);
    }
}

async fn drain_deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

fn log_task_result(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res
        && e.is_panic()
    {
        error!("A client handler panicked: {e:?}");
    }
}
