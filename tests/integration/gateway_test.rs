// tests/integration/gateway_test.rs

//! End-to-end tests over TCP
//! Tests: envelope round trips, ordering, teardown on close, and shutdown.

use super::test_helpers::TestServer;
use lildb_gateway::core::backend::MemoryDriver;
use lildb_gateway::core::protocol::{Request, Response};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_connect_command_disconnect_over_tcp() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let connected = client.connect_backend("10.0.0.5").await.unwrap();
    assert!(connected.success);
    assert_eq!(connected.message, "connected to 10.0.0.5");

    let response = client.command("LIST").await.unwrap();
    assert_eq!(response.output, "LIST");

    let disconnected = client.disconnect_backend("10.0.0.5").await.unwrap();
    assert!(disconnected.success);
    assert_eq!(server.driver.closes_for("10.0.0.5"), 1);

    client.close().await.unwrap();
    server.wait_for_sessions(0).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_shared_connection_released_when_stream_closes() {
    let server = TestServer::start().await;
    let mut a = server.client().await;
    let mut b = server.client().await;

    assert!(a.connect_backend("10.0.0.5").await.unwrap().success);
    assert!(b.connect_backend("10.0.0.5").await.unwrap().success);
    assert_eq!(server.state.registry.ref_count("10.0.0.5").await, Some(2));
    assert_eq!(server.driver.opens_for("10.0.0.5"), 1);

    assert_eq!(a.command("LIST").await.unwrap().output, "LIST");

    a.close().await.unwrap();
    server.wait_for_ref_count("10.0.0.5", Some(1)).await;

    let response = b.disconnect_backend("10.0.0.5").await.unwrap();
    assert!(response.success);
    server.wait_for_ref_count("10.0.0.5", None).await;
    assert_eq!(server.driver.closes_for("10.0.0.5"), 1);

    b.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_dropped_client_releases_reference() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    assert!(client.connect_backend("db1").await.unwrap().success);
    server.wait_for_ref_count("db1", Some(1)).await;

    drop(client);

    server.wait_for_ref_count("db1", None).await;
    server.wait_for_sessions(0).await;
    assert_eq!(server.driver.closes_for("db1"), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_command_before_connect_keeps_stream_open() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let response = client.command("GET k").await.unwrap();
    assert_eq!(
        response.output,
        "ERR no connection: connect to a database first"
    );

    // The same stream keeps working.
    assert!(client.connect_backend("db1").await.unwrap().success);
    assert_eq!(client.command("GET k").await.unwrap().output, "GET k");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_unknown_over_tcp_is_not_found() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let response = client.disconnect_backend("10.9.9.9").await.unwrap();
    assert!(!response.success);
    assert_eq!(response.message, "not found");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let server = TestServer::with_driver(
        MemoryDriver::new().with_run_delay(Duration::from_millis(2)),
    )
    .await;
    let mut client = server.client().await;

    let mut requests = vec![Request::connect("db1")];
    requests.extend((0..50).map(|i| Request::command(format!("ECHO {i}"))));
    requests.push(Request::disconnect("db1"));
    requests.push(Request::command("ECHO after"));

    let responses = client.pipeline(requests).await.unwrap();
    assert_eq!(responses.len(), 53);

    assert!(matches!(&responses[0], Response::Connect(r) if r.success));
    for (i, response) in responses[1..51].iter().enumerate() {
        match response {
            Response::Command(r) => assert_eq!(r.output, format!("ECHO {i}")),
            other => panic!("Expected a command response, got {other:?}"),
        }
    }
    assert!(matches!(&responses[51], Response::Disconnect(r) if r.success));
    assert!(
        matches!(&responses[52], Response::Command(r) if r.output.contains("no connection"))
    );

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_queued_requests_answered_after_half_close() {
    let server = TestServer::start().await;
    let stream = TcpStream::connect(server.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();

    write_half
        .write_all(
            b"{\"type\":\"connect\",\"ip\":\"db1\"}\n\
              {\"type\":\"command\",\"command\":\"PING\"}\n\
              {\"type\":\"command\",\"command\":\"LAST\"}",
        )
        .await
        .unwrap();
    write_half.shutdown().await.unwrap();

    let mut lines = BufReader::new(read_half).lines();
    let mut received = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        received.push(serde_json::from_str::<Response>(&line).unwrap());
    }

    assert_eq!(received.len(), 3);
    assert!(matches!(&received[0], Response::Connect(r) if r.success));
    assert!(matches!(&received[1], Response::Command(r) if r.output == "PING"));
    assert!(matches!(&received[2], Response::Command(r) if r.output == "LAST"));

    server.wait_for_ref_count("db1", None).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_envelope_ends_session_and_releases() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    assert!(client.connect_backend("db1").await.unwrap().success);

    let mut raw = TcpStream::connect(server.addr).await.unwrap();
    raw.write_all(b"{\"type\":\"connect\",\"ip\":\"db1\"}\n")
        .await
        .unwrap();
    server.wait_for_ref_count("db1", Some(2)).await;

    raw.write_all(b"this is not json\n").await.unwrap();
    server.wait_for_ref_count("db1", Some(1)).await;

    // The well-behaved client is unaffected.
    assert_eq!(client.command("PING").await.unwrap().output, "PING");

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_backend_connections() {
    let server = TestServer::start().await;
    let mut a = server.client().await;
    let mut b = server.client().await;
    assert!(a.connect_backend("db1").await.unwrap().success);
    assert!(b.connect_backend("db2").await.unwrap().success);

    let driver = server.driver.clone();
    server.shutdown().await;

    assert_eq!(driver.live_links(), 0);
    assert_eq!(driver.closes(), 2);
    assert!(a.command("PING").await.is_err());
}
