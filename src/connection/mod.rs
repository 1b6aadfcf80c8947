// src/connection/mod.rs

//! Per-connection drain state, request accounting, and the keep-alive request
//! loop of a single client connection.

mod accounting;
mod guard;
mod handler;
mod state;
mod transport;

pub use accounting::{RequestContext, RequestGuard};
pub use guard::{ConnectionGuard, HandshakeGuard};
pub use handler::ConnectionHandler;
pub use state::{Connection, ConnectionId, TransportKind};
pub use transport::{KillSwitch, Transport};
