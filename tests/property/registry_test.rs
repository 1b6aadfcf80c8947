// tests/property/registry_test.rs

//! Property-based tests for the coordinator registry.
//! Registering more connections never disturbs the state of existing ones.

use crate::test_helpers::test_connection;
use keepdrain::DrainCoordinator;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_new_registrations_leave_existing_state_unchanged(
        busy in 0usize..8,
        extra in 1usize..16,
    ) {
        let coordinator = DrainCoordinator::new();
        let (conn, transport) = test_connection(1);
        let _guard = coordinator.on_accept(&conn).unwrap();
        for _ in 0..busy {
            conn.mark_busy();
        }

        let mut others = Vec::new();
        for id in 0..extra {
            let (other, _) = test_connection(100 + id as u64);
            others.push((coordinator.on_accept(&other).unwrap(), other));
        }
        // A second registration is refused and changes nothing.
        prop_assert!(coordinator.on_accept(&conn).is_err());

        prop_assert_eq!(conn.pending_requests(), busy);
        prop_assert!(!conn.is_termination_requested());
        prop_assert_eq!(transport.close_count(), 0);
        prop_assert_eq!(coordinator.active_connections(), extra + 1);

        drop(others);
        prop_assert_eq!(coordinator.active_connections(), 1);
        prop_assert_eq!(conn.pending_requests(), busy);

        // The connection is still reached by the close broadcast.
        prop_assert_eq!(coordinator.on_server_close(), 1);
        prop_assert!(conn.is_termination_requested());
        prop_assert_eq!(transport.close_count(), usize::from(busy == 0));
    }

    #[test]
    fn test_close_signals_every_live_connection(total in 0usize..24, busy_mask in any::<u32>()) {
        let coordinator = DrainCoordinator::new();
        let mut held = Vec::new();
        for id in 0..total {
            let (conn, transport) = test_connection(id as u64);
            let busy = busy_mask & (1 << id) != 0;
            if busy {
                conn.mark_busy();
            }
            held.push((coordinator.on_accept(&conn).unwrap(), conn, transport, busy));
        }

        prop_assert_eq!(coordinator.on_server_close(), total);
        for (_, conn, transport, busy) in &held {
            prop_assert!(conn.is_termination_requested());
            prop_assert_eq!(transport.close_count(), usize::from(!*busy));
        }

        for (_, conn, transport, busy) in &held {
            if *busy {
                conn.mark_idle();
                prop_assert!(conn.close_if_drained());
            }
            prop_assert_eq!(transport.close_count(), 1);
        }
        drop(held);
        prop_assert_eq!(coordinator.active_connections(), 0);
    }
}
