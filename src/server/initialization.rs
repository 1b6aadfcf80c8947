// src/server/initialization.rs

//! Binds the listener, loads TLS material and builds the server context.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::{DrainCoordinator, KeepDrainError};
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    config.validate_listener()?;
    log_startup_info(&config);

    let acceptor = setup_tls(&config).await?;

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "keepdrain listening on {}{}",
        listener.local_addr()?,
        if acceptor.is_some() { " (TLS)" } else { "" }
    );

    let coordinator = DrainCoordinator::new();
    // Subscribe now so a close request made before the accept loop starts
    // is still observed.
    let shutdown_rx = coordinator.subscribe_shutdown();
    let (force_tx, force_rx) = broadcast::channel(1);
    let (background_shutdown_tx, _) = broadcast::channel(1);
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    Ok(ServerContext {
        config,
        coordinator,
        listener,
        acceptor,
        connection_permits,
        shutdown_rx,
        force_tx,
        force_rx,
        background_shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
async fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(KeepDrainError::from)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

fn log_startup_info(config: &Config) {
    info!("Accepting at most {} concurrent clients.", config.max_clients);
    match config.shutdown.drain_timeout {
        Some(timeout) => info!(
            "Busy connections get {:?} to finish after a close request.",
            timeout
        ),
        None => warn!(
            "No shutdown.drain_timeout set: a close request waits for every in-flight request, however long it takes."
        ),
    }
}
