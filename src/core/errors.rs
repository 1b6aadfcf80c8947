// src/core/errors.rs

//! Defines the primary error type for the drain layer and its server.

use crate::connection::ConnectionId;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum for the library.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum KeepDrainError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// `mark_idle` was called on a connection with no request in flight.
    /// This always indicates a missed `mark_busy` somewhere.
    #[error("Request accounting underflow on {connection}")]
    AccountingUnderflow { connection: ConnectionId },

    #[error("Frame exceeds the maximum length of {limit} bytes")]
    FrameTooLong { limit: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A connection id was registered with a coordinator a second time.
    #[error("{connection} is already registered")]
    AlreadyRegistered { connection: ConnectionId },

    #[error("TLS Error: {0}")]
    Tls(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for KeepDrainError {
    fn clone(&self) -> Self {
        match self {
            KeepDrainError::Io(e) => KeepDrainError::Io(Arc::clone(e)),
            KeepDrainError::AccountingUnderflow { connection } => {
                KeepDrainError::AccountingUnderflow {
                    connection: *connection,
                }
            }
            KeepDrainError::FrameTooLong { limit } => KeepDrainError::FrameTooLong { limit: *limit },
            KeepDrainError::InvalidFrame(s) => KeepDrainError::InvalidFrame(s.clone()),
            KeepDrainError::Tls(s) => KeepDrainError::Tls(s.clone()),
            KeepDrainError::AlreadyRegistered { connection } => {
                KeepDrainError::AlreadyRegistered {
                    connection: *connection,
                }
            }
        }
    }
}

impl PartialEq for KeepDrainError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeepDrainError::Io(e1), KeepDrainError::Io(e2)) => e1.kind() == e2.kind(),
            (
                KeepDrainError::AccountingUnderflow { connection: c1 },
                KeepDrainError::AccountingUnderflow { connection: c2 },
            ) => c1 == c2,
            (KeepDrainError::FrameTooLong { limit: l1 }, KeepDrainError::FrameTooLong { limit: l2 }) => {
                l1 == l2
            }
            (KeepDrainError::InvalidFrame(s1), KeepDrainError::InvalidFrame(s2)) => s1 == s2,
            (KeepDrainError::Tls(s1), KeepDrainError::Tls(s2)) => s1 == s2,
            (
                KeepDrainError::AlreadyRegistered { connection: c1 },
                KeepDrainError::AlreadyRegistered { connection: c2 },
            ) => c1 == c2,
            _ => false,
        }
    }
}

impl KeepDrainError {
    /// Returns true for I/O failures that just mean the peer went away.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, KeepDrainError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ))
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for KeepDrainError {
    fn from(e: std::io::Error) -> Self {
        KeepDrainError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for KeepDrainError {
    fn from(e: std::str::Utf8Error) -> Self {
        KeepDrainError::InvalidFrame(format!("request is not valid UTF-8: {e}"))
    }
}

impl From<rustls::Error> for KeepDrainError {
    fn from(e: rustls::Error) -> Self {
        KeepDrainError::Tls(e.to_string())
    }
}
