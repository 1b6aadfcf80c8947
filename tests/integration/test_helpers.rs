// tests/integration/test_helpers.rs

//! Test helpers shared by the unit, integration and property tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::BytesMut;
use keepdrain::config::{Config, TlsConfig};
use keepdrain::connection::{Connection, ConnectionId, RequestContext, Transport, TransportKind};
use keepdrain::core::Service;
use keepdrain::core::commands::CommandService;
use keepdrain::core::protocol::{LineFrame, LineFrameCodec, Reply, decode_reply};
use keepdrain::server::{Server, ServerHandle};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsConnector, rustls};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs a test subscriber (ignoring the error if one already exists).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A transport that only counts how often it was asked to close.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    closes: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_addr() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// Builds a connection backed by a `RecordingTransport`.
pub fn test_connection(id: u64) -> (Arc<Connection>, RecordingTransport) {
    let transport = RecordingTransport::default();
    let connection = Arc::new(Connection::new(
        ConnectionId(id),
        test_addr(),
        TransportKind::Plain,
        transport.clone(),
    ));
    (connection, transport)
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        ..Config::default()
    }
}

pub fn tls_fixture(name: &str) -> String {
    format!("{}/tests/fixtures/tls/{name}", env!("CARGO_MANIFEST_DIR"))
}

/// A loopback config serving TLS with the fixture certificate for `localhost`.
pub fn tls_test_config() -> Config {
    Config {
        tls: TlsConfig {
            enabled: true,
            cert_path: tls_fixture("server.crt"),
            key_path: tls_fixture("server.key"),
        },
        ..test_config()
    }
}

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_config(), CommandService).await
    }

    pub async fn start_with<S: Service>(config: Config, service: S) -> Self {
        init_tracing();
        let server = Server::bind(config, service)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to read local address");
        let handle = server.handle();
        let task = tokio::spawn(server.run());
        Self { addr, handle, task }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    pub async fn connect_tls(&self) -> TestClient {
        TestClient::connect_tls(self.addr).await
    }

    /// Waits until `count` connections are registered with the coordinator.
    pub async fn wait_for_connections(&self, count: usize) {
        let handle = self.handle.clone();
        assert!(
            eventually(|| handle.active_connections() == count).await,
            "expected {count} registered connection(s), found {}",
            handle.active_connections()
        );
    }

    pub fn connection(&self, id: u64) -> Arc<Connection> {
        self.handle
            .coordinator()
            .connection(ConnectionId(id))
            .expect("connection should be registered")
    }

    /// Waits for the server's run task to return.
    pub async fn join(self) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not shut down in time")
            .expect("server task panicked")
    }
}

pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

/// A line-protocol client, over plain TCP or TLS.
pub struct TestClient {
    stream: Box<dyn ClientStream>,
    buf: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test server");
        Self {
            stream: Box::new(stream),
            buf: BytesMut::new(),
        }
    }

    /// Connects and completes a TLS handshake, trusting only the fixture CA.
    pub async fn connect_tls(addr: SocketAddr) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        let mut reader = BufReader::new(File::open(tls_fixture("ca.crt")).unwrap());
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert.unwrap()).unwrap();
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let tcp = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test server");
        let domain = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let stream = connector
            .connect(domain, tcp)
            .await
            .expect("TLS handshake with test server failed");
        Self {
            stream: Box::new(stream),
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("Failed to write request");
    }

    /// Reads the next reply, or `None` once the server closed the connection.
    pub async fn read_reply(&mut self) -> Option<Reply> {
        loop {
            if let Some(reply) = decode_reply(&mut self.buf).expect("malformed reply") {
                return Some(reply);
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub async fn request(&mut self, line: &str) -> Option<Reply> {
        self.send(line).await;
        self.read_reply().await
    }

    /// True if the server closes the connection within `within`.
    pub async fn is_closed_within(&mut self, within: Duration) -> bool {
        matches!(
            tokio::time::timeout(within, self.read_reply()).await,
            Ok(None)
        )
    }
}

pub fn simple(text: &str) -> Option<Reply> {
    Some(Reply::Simple(text.to_string()))
}

/// A service whose `HOLD` requests block until the test releases them, and
/// which never looks at the termination flag.
#[derive(Clone)]
pub struct GateService {
    started: mpsc::UnboundedSender<ConnectionId>,
    gate: Arc<Semaphore>,
}

pub struct Gate {
    pub started: mpsc::UnboundedReceiver<ConnectionId>,
    gate: Arc<Semaphore>,
}

impl Gate {
    pub fn release(&self, requests: usize) {
        self.gate.add_permits(requests);
    }

    pub async fn wait_started(&mut self) -> ConnectionId {
        tokio::time::timeout(Duration::from_secs(2), self.started.recv())
            .await
            .expect("request did not start in time")
            .expect("service dropped")
    }
}

impl GateService {
    pub fn new() -> (Self, Gate) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                started: tx,
                gate: gate.clone(),
            },
            Gate { started: rx, gate },
        )
    }
}

#[async_trait]
impl Service for GateService {
    type Request = LineFrame;
    type Response = Reply;
    type Codec = LineFrameCodec;

    async fn call(&self, request: LineFrame, ctx: &RequestContext) -> Reply {
        if request.name() == Some("HOLD") {
            let _ = self.started.send(ctx.connection_id());
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            return Reply::Simple("DONE".to_string());
        }
        Reply::Simple("PONG".to_string())
    }
}
