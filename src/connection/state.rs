// src/connection/state.rs

//! Per-connection drain accounting and the close decision.

use super::transport::Transport;
use crate::core::KeepDrainError;
use crate::core::signal::{OneShotSignal, SubscriptionId, TerminationNotice};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, error, trace};

/// Unique identifier for an accepted connection within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Whether the connection was accepted in plaintext or after a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Tls,
}

#[derive(Debug, Default)]
struct DrainState {
    pending_requests: usize,
    termination_requested: bool,
    close_initiated: bool,
}

/// One accepted transport-level socket, as seen by the drain layer.
///
/// A connection closes exactly when termination has been requested and no
/// request is in flight. Both conditions are re-evaluated whenever either one
/// changes, and the transport close primitive is invoked at most once.
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    kind: TransportKind,
    state: Mutex<DrainState>,
    termination: OneShotSignal,
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        kind: TransportKind,
        transport: impl Transport + 'static,
    ) -> Self {
        Self {
            id,
            addr,
            kind,
            state: Mutex::new(DrainState::default()),
            termination: OneShotSignal::new(),
            transport: Box::new(transport),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending_requests
    }

    pub fn is_termination_requested(&self) -> bool {
        self.state.lock().termination_requested
    }

    /// True once the drain layer has asked the transport to close.
    pub fn is_close_initiated(&self) -> bool {
        self.state.lock().close_initiated
    }

    /// Records the start of a request/response cycle. Returns the new count.
    pub fn mark_busy(&self) -> usize {
        let mut state = self.state.lock();
        state.pending_requests += 1;
        state.pending_requests
    }

    /// Records the end of a request/response cycle. Returns the new count.
    ///
    /// # Panics
    ///
    /// Panics if no request is in flight. That can only happen when a
    /// `mark_busy` was missed, and clamping would hide the bug.
    pub fn mark_idle(&self) -> usize {
        match self.try_mark_idle() {
            Ok(remaining) => remaining,
            Err(e) => panic!("{e}"),
        }
    }

    /// Like [`Connection::mark_idle`], but reports underflow as an error.
    pub fn try_mark_idle(&self) -> Result<usize, KeepDrainError> {
        let mut state = self.state.lock();
        if state.pending_requests == 0 {
            error!(
                "Accounting underflow on {} ({}): mark_idle without a pending request.",
                self.id, self.addr
            );
            return Err(KeepDrainError::AccountingUnderflow {
                connection: self.id,
            });
        }
        state.pending_requests -= 1;
        Ok(state.pending_requests)
    }

    /// Requests termination of this connection.
    ///
    /// The first call sets the flag. If the connection is idle it is closed
    /// before this returns; otherwise the termination notice fires and the
    /// connection stays open until its last pending request completes.
    /// Repeated calls are no-ops and return `false`.
    pub fn request_termination(&self) -> bool {
        let close_now = {
            let mut state = self.state.lock();
            if state.termination_requested {
                trace!("Termination already requested for {}.", self.id);
                return false;
            }
            state.termination_requested = true;
            if state.pending_requests == 0 && !state.close_initiated {
                state.close_initiated = true;
                true
            } else {
                false
            }
        };

        if close_now {
            debug!("{} ({}) is idle, closing it now.", self.id, self.addr);
            self.transport.close();
        } else {
            let notified = self.termination.fire().unwrap_or(0);
            debug!(
                "{} ({}) is busy, deferring close ({} termination listener(s) notified).",
                self.id, self.addr, notified
            );
        }
        true
    }

    /// Closes the connection if termination was requested and it is idle.
    /// Returns true if this call initiated the close.
    pub fn close_if_drained(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.termination_requested
                || state.pending_requests != 0
                || state.close_initiated
            {
                return false;
            }
            state.close_initiated = true;
        }
        debug!("{} ({}) drained, closing it.", self.id, self.addr);
        self.transport.close();
        true
    }

    /// Subscribes to the termination notice. The callback runs at most once,
    /// synchronously inside the `request_termination` call that fires it.
    /// Subscribing after the notice fired returns `None`.
    pub fn on_terminate<F>(&self, callback: F) -> Option<SubscriptionId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.termination.subscribe(callback)
    }

    pub fn remove_terminate_listener(&self, id: SubscriptionId) -> bool {
        self.termination.unsubscribe(id)
    }

    /// An awaitable version of [`Connection::on_terminate`].
    pub fn termination_notice(&self) -> TerminationNotice {
        self.termination.notice()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("kind", &self.kind)
            .field("pending_requests", &state.pending_requests)
            .field("termination_requested", &state.termination_requested)
            .field("close_initiated", &state.close_initiated)
            .finish()
    }
}
