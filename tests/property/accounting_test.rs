// tests/property/accounting_test.rs

//! Property-based tests for per-connection accounting.
//! The connection is compared step by step against a simple model.

use crate::test_helpers::test_connection;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
enum Event {
    Busy,
    Idle,
    Terminate,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::Busy),
        3 => Just(Event::Idle),
        1 => Just(Event::Terminate),
    ]
}

#[derive(Debug, Default)]
struct Model {
    pending: usize,
    terminated: bool,
    closed: bool,
    notices: usize,
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_accounting_matches_model(events in prop::collection::vec(event(), 0..64)) {
        let (conn, transport) = test_connection(1);
        let notices = Arc::new(AtomicUsize::new(0));
        let observer = notices.clone();
        conn.on_terminate(move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        let mut model = Model::default();
        for event in events {
            match event {
                Event::Busy => {
                    model.pending += 1;
                    prop_assert_eq!(conn.mark_busy(), model.pending);
                }
                Event::Idle => {
                    if model.pending == 0 {
                        prop_assert!(conn.try_mark_idle().is_err());
                    } else {
                        model.pending -= 1;
                        prop_assert_eq!(conn.try_mark_idle().unwrap(), model.pending);
                        let closes_now = model.terminated && model.pending == 0 && !model.closed;
                        prop_assert_eq!(conn.close_if_drained(), closes_now);
                        model.closed |= closes_now;
                    }
                }
                Event::Terminate => {
                    let first = !model.terminated;
                    prop_assert_eq!(conn.request_termination(), first);
                    if first {
                        model.terminated = true;
                        if model.pending == 0 {
                            model.closed = true;
                        } else {
                            model.notices += 1;
                        }
                    }
                }
            }

            prop_assert_eq!(conn.pending_requests(), model.pending);
            prop_assert_eq!(conn.is_termination_requested(), model.terminated);
            prop_assert_eq!(conn.is_close_initiated(), model.closed);
            prop_assert_eq!(transport.close_count(), usize::from(model.closed));
            prop_assert_eq!(notices.load(Ordering::SeqCst), model.notices);
        }
    }

    #[test]
    fn test_close_happens_only_when_drained(busy in 1usize..32) {
        let (conn, transport) = test_connection(1);
        for _ in 0..busy {
            conn.mark_busy();
        }
        conn.request_termination();
        for remaining in (0..busy).rev() {
            prop_assert_eq!(transport.close_count(), 0);
            conn.mark_idle();
            prop_assert_eq!(conn.close_if_drained(), remaining == 0);
        }
        prop_assert_eq!(transport.close_count(), 1);
    }
}
