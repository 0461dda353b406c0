// tests/integration/scenario_test.rs

//! Integration tests for shared connections across sessions
//! Tests: reference counting, teardown, and error payloads, in-process.

use super::test_helpers::TestContext;
use lildb_gateway::core::protocol::{Request, Response};
use lildb_gateway::core::{ConnectOutcome, DisconnectError};

// ===== Shared connection lifecycle =====

#[tokio::test]
async fn test_two_sessions_share_one_connection() {
    let ctx = TestContext::new();
    let a = ctx.sessions.open_stream(None);
    let b = ctx.sessions.open_stream(None);

    let first = ctx.sessions.connect(&a, "10.0.0.5").await.unwrap();
    let second = ctx.sessions.connect(&b, "10.0.0.5").await.unwrap();

    let (ConnectOutcome::Connected(first), ConnectOutcome::Connected(second)) = (first, second)
    else {
        panic!("Both sessions should take a reference");
    };
    assert!(first.opened);
    assert!(!second.opened);
    assert_eq!(first.id, second.id);
    assert_eq!(second.ref_count, 2);
    assert_eq!(ctx.driver.opens_for("10.0.0.5"), 1);

    let output = ctx.dispatcher.execute(&a, "LIST").await.unwrap();
    assert_eq!(output, "LIST");

    assert!(ctx.sessions.close_stream(&a).await);
    assert_eq!(ctx.registry.ref_count("10.0.0.5").await, Some(1));
    assert_eq!(ctx.driver.closes_for("10.0.0.5"), 0);

    ctx.sessions.disconnect(&b, "10.0.0.5").await.unwrap();
    assert_eq!(ctx.registry.ref_count("10.0.0.5").await, None);
    assert!(!ctx.registry.contains("10.0.0.5").await);
    assert_eq!(ctx.driver.closes_for("10.0.0.5"), 1);
    assert_eq!(ctx.driver.live_links(), 0);
}

#[tokio::test]
async fn test_command_without_connect_reports_no_connection() {
    let ctx = TestContext::new();
    let session = ctx.sessions.open_stream(None);

    let response = ctx
        .dispatcher
        .handle(&session, Request::command("GET k"))
        .await;
    let Response::Command(response) = response else {
        panic!("A command request must get a command response");
    };
    assert!(response.output.contains("no connection"));
    assert!(ctx.driver.executed().is_empty());

    // The session is still usable.
    ctx.sessions.connect(&session, "10.0.0.5").await.unwrap();
    let output = ctx.dispatcher.execute(&session, "GET k").await.unwrap();
    assert_eq!(output, "GET k");
}

#[tokio::test]
async fn test_disconnect_unknown_address_is_not_found() {
    let ctx = TestContext::new();
    let session = ctx.sessions.open_stream(None);

    let response = ctx
        .dispatcher
        .handle(&session, Request::disconnect("10.9.9.9"))
        .await;
    match response {
        Response::Disconnect(r) => {
            assert!(!r.success);
            assert_eq!(r.message, "not found");
        }
        other => panic!("Expected a disconnect response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_someone_elses_connection_is_not_bound() {
    let ctx = TestContext::new();
    let owner = ctx.sessions.open_stream(None);
    let other = ctx.sessions.open_stream(None);
    ctx.sessions.connect(&owner, "10.0.0.5").await.unwrap();

    let err = ctx
        .sessions
        .disconnect(&other, "10.0.0.5")
        .await
        .unwrap_err();
    assert_eq!(err, DisconnectError::NotBound("10.0.0.5".to_string()));
    assert_eq!(ctx.registry.ref_count("10.0.0.5").await, Some(1));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let ctx = TestContext::new();
    let a = ctx.sessions.open_stream(None);
    let b = ctx.sessions.open_stream(None);
    ctx.sessions.connect(&a, "10.0.0.5").await.unwrap();
    ctx.sessions.connect(&b, "10.0.0.5").await.unwrap();

    assert!(ctx.sessions.close_stream(&a).await);
    assert!(!ctx.sessions.close_stream(&a).await);
    assert!(!ctx.sessions.close_stream(&a).await);

    assert_eq!(ctx.registry.ref_count("10.0.0.5").await, Some(1));
    assert_eq!(ctx.sessions.active_sessions(), 1);
}

#[tokio::test]
async fn test_failure_in_one_session_does_not_affect_another() {
    let ctx = TestContext::new();
    ctx.driver.fail_command("BOOM");
    let a = ctx.sessions.open_stream(None);
    let b = ctx.sessions.open_stream(None);
    ctx.sessions.connect(&a, "10.0.0.5").await.unwrap();
    ctx.sessions.connect(&b, "10.0.0.5").await.unwrap();

    let failed = ctx.dispatcher.execute_response(&a, "BOOM").await;
    assert!(failed.output.starts_with("ERR backend failure"));

    let ok = ctx.dispatcher.execute(&b, "PING").await.unwrap();
    assert_eq!(ok, "PING");
    let still_ok = ctx.dispatcher.execute(&a, "PING").await.unwrap();
    assert_eq!(still_ok, "PING");
}

#[tokio::test]
async fn test_reconnect_after_last_disconnect_opens_fresh_link() {
    let ctx = TestContext::new();
    let session = ctx.sessions.open_stream(None);

    let ConnectOutcome::Connected(first) = ctx.sessions.connect(&session, "db1").await.unwrap()
    else {
        panic!("Expected a new connection");
    };
    ctx.sessions.disconnect(&session, "db1").await.unwrap();
    let ConnectOutcome::Connected(second) = ctx.sessions.connect(&session, "db1").await.unwrap()
    else {
        panic!("Expected a new connection");
    };

    assert!(second.opened);
    assert_ne!(first.id, second.id);
    assert_eq!(ctx.driver.opens_for("db1"), 2);
    assert_eq!(ctx.driver.closes_for("db1"), 1);
}
