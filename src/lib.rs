// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod server;

// Re-export
pub use crate::connection::{Connection, ConnectionId, RequestContext, RequestGuard};
pub use crate::core::{DrainCoordinator, KeepDrainError, Service};
pub use crate::server::{Server, ServerHandle};
