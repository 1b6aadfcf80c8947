// tests/integration/drain_scenarios_test.rs

//! End-to-end drain behavior: busy connections finish their request before
//! closing, idle ones close at once, and cooperative handlers can end early.

use super::test_helpers::{GateService, TestServer, eventually, simple, test_config};
use keepdrain::core::commands::TERMINATED_REPLY;
use std::time::Duration;

// ===== Busy connections =====

#[tokio::test]
async fn test_busy_connection_closes_after_response() {
    let (service, mut gate) = GateService::new();
    let server = TestServer::start_with(test_config(), service).await;
    let mut client = server.connect().await;

    client.send("HOLD").await;
    let id = gate.wait_started().await;
    let conn = server.connection(id.0);

    assert_eq!(server.handle.close(), 1);
    assert!(conn.is_termination_requested());
    assert!(!conn.is_close_initiated());
    assert_eq!(conn.pending_requests(), 1);

    // Still open while the request is in flight.
    assert!(!client.is_closed_within(Duration::from_millis(100)).await);

    gate.release(1);
    assert_eq!(client.read_reply().await, simple("DONE"));
    assert!(client.is_closed_within(Duration::from_secs(2)).await);
    assert!(conn.is_close_initiated());

    server.join().await.unwrap();
}

#[tokio::test]
async fn test_sleep_is_cut_short_by_close() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;
    let conn = server.connection(1);

    client.send("SLEEP 60000").await;
    assert!(eventually(|| conn.pending_requests() == 1).await);
    server.handle.close();

    let reply = tokio::time::timeout(Duration::from_secs(2), client.read_reply())
        .await
        .expect("SLEEP was not cut short");
    assert_eq!(reply, simple(TERMINATED_REPLY));
    assert!(client.is_closed_within(Duration::from_secs(2)).await);
    server.join().await.unwrap();
}

#[tokio::test]
async fn test_work_is_cut_short_by_close() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;
    let conn = server.connection(1);

    client.send("WORK 60000").await;
    assert!(eventually(|| conn.pending_requests() == 1).await);
    server.handle.close();

    let reply = tokio::time::timeout(Duration::from_secs(2), client.read_reply())
        .await
        .expect("WORK was not cut short");
    assert_eq!(reply, simple(TERMINATED_REPLY));
    assert!(client.is_closed_within(Duration::from_secs(2)).await);
    server.join().await.unwrap();
}

// ===== Idle connections =====

#[tokio::test]
async fn test_idle_connection_closes_during_close_call() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;
    let conn = server.connection(1);

    assert_eq!(server.handle.close(), 1);
    assert!(conn.is_close_initiated());
    assert!(client.is_closed_within(Duration::from_secs(2)).await);
    server.join().await.unwrap();
}

#[tokio::test]
async fn test_idle_and_busy_connections_drain_independently() {
    let (service, mut gate) = GateService::new();
    let server = TestServer::start_with(test_config(), service).await;
    let mut busy = server.connect().await;
    let mut idle = server.connect().await;
    server.wait_for_connections(2).await;

    busy.send("HOLD").await;
    gate.wait_started().await;
    assert_eq!(server.handle.close(), 2);

    assert!(idle.is_closed_within(Duration::from_secs(2)).await);
    assert!(!busy.is_closed_within(Duration::from_millis(50)).await);

    gate.release(1);
    assert_eq!(busy.read_reply().await, simple("DONE"));
    assert!(busy.is_closed_within(Duration::from_secs(2)).await);
    server.join().await.unwrap();
}

// ===== Keep-alive accounting =====

#[tokio::test]
async fn test_sequential_requests_return_to_idle() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_connections(1).await;
    let conn = server.connection(1);

    assert_eq!(client.request("PING").await, simple("PONG"));
    assert!(eventually(|| conn.pending_requests() == 0).await);

    assert_eq!(
        client.request("STATUS").await,
        simple("pending=1 terminating=false")
    );
    assert!(eventually(|| conn.pending_requests() == 0).await);

    assert_eq!(client.request("ECHO still here").await, simple("still here"));
    assert!(eventually(|| conn.pending_requests() == 0).await);
    assert!(!conn.is_close_initiated());

    server.handle.close();
    assert!(client.is_closed_within(Duration::from_secs(2)).await);
    server.join().await.unwrap();
}

#[tokio::test]
async fn test_pipelined_requests_are_answered_in_order() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.send("PING\r\nECHO one\r\nECHO two").await;
    assert_eq!(client.read_reply().await, simple("PONG"));
    assert_eq!(client.read_reply().await, simple("one"));
    assert_eq!(client.read_reply().await, simple("two"));

    server.handle.close();
    assert!(client.is_closed_within(Duration::from_secs(2)).await);
    server.join().await.unwrap();
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    let reply = client.request("FLY away").await;
    assert!(matches!(reply, Some(keepdrain::core::protocol::Reply::Error(_))));
    assert_eq!(client.request("PING").await, simple("PONG"));

    server.handle.close();
    server.join().await.unwrap();
}
