// src/connection/accounting.rs

//! Request accounting: bridges a request/response protocol running on a
//! connection to that connection's busy/idle counters.

use super::state::{Connection, ConnectionId};
use crate::core::metrics;
use crate::core::signal::{SubscriptionId, TerminationNotice};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Marks one request/response cycle as in flight on a connection.
///
/// `begin` increments the connection's pending count before any handler logic
/// runs. `finish` must be called once the response has been flushed; it
/// decrements the count and closes the connection if it was waiting to drain.
/// Dropping an unfinished guard settles the accounting the same way, which
/// covers write failures and early exits.
#[must_use = "dropping the guard immediately ends the request"]
pub struct RequestGuard {
    connection: Arc<Connection>,
    started: Instant,
    settled: bool,
}

impl RequestGuard {
    pub fn begin(connection: &Arc<Connection>) -> Self {
        connection.mark_busy();
        metrics::REQUESTS_IN_FLIGHT.inc();
        Self {
            connection: connection.clone(),
            started: Instant::now(),
            settled: false,
        }
    }

    /// Ends the cycle after the last byte of the response was flushed.
    /// Returns true if this closed the connection.
    pub fn finish(mut self) -> bool {
        metrics::REQUESTS_PROCESSED_TOTAL.inc();
        self.settle()
    }

    fn settle(&mut self) -> bool {
        if self.settled {
            return false;
        }
        self.settled = true;
        metrics::REQUESTS_IN_FLIGHT.dec();
        metrics::REQUEST_LATENCY_SECONDS.observe(self.started.elapsed().as_secs_f64());

        if let Err(e) = self.connection.try_mark_idle() {
            error!("{}", e);
            if !std::thread::panicking() {
                panic!("{e}");
            }
            return false;
        }

        let closed = self.connection.close_if_drained();
        if closed {
            metrics::CONNECTIONS_DRAINED_TOTAL.inc();
            debug!(
                "{} finished its last pending request after termination.",
                self.connection.id()
            );
        }
        closed
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                "Request on {} ended without a completed response.",
                self.connection.id()
            );
            self.settle();
        }
    }
}

/// What a service sees of the connection a request arrived on.
#[derive(Clone)]
pub struct RequestContext {
    connection: Arc<Connection>,
}

impl RequestContext {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn pending_requests(&self) -> usize {
        self.connection.pending_requests()
    }

    /// Polling access to the termination flag, at whatever cadence the
    /// handler chooses.
    pub fn is_terminating(&self) -> bool {
        self.connection.is_termination_requested()
    }

    /// Subscribes to the connection's termination notice. Take it at the start
    /// of the work you may want to cut short; a notice taken after termination
    /// was requested never resolves.
    pub fn termination_notice(&self) -> TerminationNotice {
        self.connection.termination_notice()
    }

    pub fn on_terminate<F>(&self, callback: F) -> Option<SubscriptionId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.connection.on_terminate(callback)
    }
}
