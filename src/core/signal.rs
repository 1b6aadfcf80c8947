// src/core/signal.rs

//! A broadcast-once signal.
//!
//! `OneShotSignal` delivers a notification to the listeners registered at the
//! moment it fires, exactly one time. Listeners that subscribe afterwards are
//! dropped without ever being called; there is no replay.

use parking_lot::Mutex;
use std::fmt;
use tokio::sync::oneshot;
use tracing::trace;

type Listener = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a listener so it can be removed before the signal fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct SignalState {
    fired: bool,
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

/// A completion flag plus a callback list that is drained on the first fire.
#[derive(Default)]
pub struct OneShotSignal {
    state: Mutex<SignalState>,
}

impl OneShotSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. Returns `None`, and drops the listener uncalled,
    /// if the signal has already fired.
    pub fn subscribe<F>(&self, listener: F) -> Option<SubscriptionId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.fired {
            trace!("Late subscription to an already fired signal; it will never be notified.");
            return None;
        }
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Box::new(listener)));
        Some(id)
    }

    /// Removes a listener that has not been called yet.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }

    /// Fires the signal. Only the first call notifies anyone; it returns the
    /// number of listeners called. Later calls return `None`.
    ///
    /// Listeners run on the calling thread after the internal lock is released,
    /// so they may freely call back into this signal.
    pub fn fire(&self) -> Option<usize> {
        let listeners = {
            let mut state = self.state.lock();
            if state.fired {
                return None;
            }
            state.fired = true;
            std::mem::take(&mut state.listeners)
        };
        let count = listeners.len();
        for (_, listener) in listeners {
            listener();
        }
        Some(count)
    }

    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Subscribes a [`TerminationNotice`] future.
    pub fn notice(&self) -> TerminationNotice {
        let (tx, rx) = oneshot::channel();
        self.subscribe(move || {
            let _ = tx.send(());
        });
        TerminationNotice { rx }
    }
}

impl fmt::Debug for OneShotSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OneShotSignal")
            .field("fired", &state.fired)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// An awaitable subscription to a [`OneShotSignal`].
///
/// Resolves when the signal fires. A notice taken after the signal already
/// fired never resolves, so callers must take it before the event they want
/// to observe. Use it inside `tokio::select!` next to the real work.
#[derive(Debug)]
pub struct TerminationNotice {
    rx: oneshot::Receiver<()>,
}

impl TerminationNotice {
    pub async fn notified(self) {
        if self.rx.await.is_err() {
            // The listener was dropped without being called: a late subscriber.
            std::future::pending::<()>().await;
        }
    }

    /// Non-blocking check for whether the notice has been delivered.
    pub fn try_notified(&mut self) -> bool {
        matches!(self.rx.try_recv(), Ok(()))
    }
}
