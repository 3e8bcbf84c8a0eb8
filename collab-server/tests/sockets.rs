//! End-to-end tests driving the server over real WebSocket connections.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::json;
use tokio::time;

use collab_server::{ServerConfig, ServerState, server};

pub mod common;

#[tokio::test]
async fn s1_insert_round_trips_through_the_wire() -> Result<()> {
    logging();
    let state = ServerState::new(ServerConfig::default());
    let client = TestClient::start(server(Arc::clone(&state))).await?;

    let mut socket = client.connect("u1").await?;
    let ack = socket.recv().await?;
    assert_eq!(ack["type"], "connection");
    let session_id = ack["sessionId"].as_str().unwrap().to_string();

    socket
        .send(&json!({ "type": "subscribe", "sessionId": session_id, "payload": { "documentId": "doc1" } }))
        .await;

    // Another subscriber so the fan-out has somewhere to go.
    let mut observer = client.connect("u2").await?;
    let observer_ack = observer.recv().await?;
    let observer_session_id = observer_ack["sessionId"].as_str().unwrap().to_string();
    observer
        .send(&json!({ "type": "subscribe", "sessionId": observer_session_id, "payload": { "documentId": "doc1" } }))
        .await;

    socket
        .send(&json!({
            "type": "operation",
            "sessionId": session_id,
            "payload": {
                "documentId": "doc1",
                "operation": {
                    "id": "o1",
                    "type": "insert",
                    "position": 0,
                    "content": "Hello World",
                    "length": 0,
                    "clientId": "u1",
                    "timestamp": 0,
                    "version": 0,
                },
                "version": 1,
            }
        }))
        .await;

    let broadcast = observer.recv().await?;
    assert_eq!(broadcast["type"], "operation");
    assert_eq!(broadcast["documentId"], "doc1");
    assert_eq!(broadcast["data"]["content"], "Hello World");

    Ok(())
}

#[tokio::test]
async fn s7_fan_out_excludes_sender() -> Result<()> {
    logging();
    let state = ServerState::new(ServerConfig::default());
    let client = TestClient::start(server(Arc::clone(&state))).await?;

    let mut s1 = client.connect("u1").await?;
    let ack1 = s1.recv().await?;
    let sid1 = ack1["sessionId"].as_str().unwrap().to_string();
    s1.send(&json!({ "type": "subscribe", "sessionId": sid1, "payload": { "documentId": "doc1" } }))
        .await;

    let mut s2 = client.connect("u2").await?;
    let ack2 = s2.recv().await?;
    let sid2 = ack2["sessionId"].as_str().unwrap().to_string();
    s2.send(&json!({ "type": "subscribe", "sessionId": sid2, "payload": { "documentId": "doc1" } }))
        .await;

    s1.send(&json!({
        "type": "operation",
        "sessionId": sid1,
        "payload": {
            "documentId": "doc1",
            "operation": {
                "id": "o1", "type": "insert", "position": 0, "content": "hi",
                "length": 0, "clientId": "u1", "timestamp": 0, "version": 0,
            },
            "version": 1,
        }
    }))
    .await;

    let broadcast = s2.recv().await?;
    assert_eq!(broadcast["type"], "operation");

    // s1 should not receive its own broadcast; confirm by racing a timeout.
    let raced = time::timeout(Duration::from_millis(200), s1.recv()).await;
    assert!(raced.is_err(), "sender should not receive its own operation");

    Ok(())
}

#[tokio::test]
async fn invalid_frame_does_not_close_the_connection() -> Result<()> {
    logging();
    let state = ServerState::new(ServerConfig::default());
    let client = TestClient::start(server(Arc::clone(&state))).await?;

    let mut socket = client.connect("u1").await?;
    let ack = socket.recv().await?;
    let session_id = ack["sessionId"].as_str().unwrap().to_string();

    socket.send(&json!({ "sessionId": session_id })).await; // missing "type"
    socket
        .send(&json!({ "type": "heartbeat", "sessionId": session_id }))
        .await;

    // Connection is still alive: the server doesn't reply to heartbeat, so
    // confirm liveness via a follow-up subscribe/operation round-trip.
    socket
        .send(&json!({ "type": "subscribe", "sessionId": session_id, "payload": { "documentId": "doc1" } }))
        .await;
    let mut observer = client.connect("u2").await?;
    let observer_ack = observer.recv().await?;
    let observer_sid = observer_ack["sessionId"].as_str().unwrap().to_string();
    observer
        .send(&json!({ "type": "subscribe", "sessionId": observer_sid, "payload": { "documentId": "doc1" } }))
        .await;
    socket
        .send(&json!({
            "type": "operation",
            "sessionId": session_id,
            "payload": {
                "documentId": "doc1",
                "operation": { "id": "o1", "type": "insert", "position": 0, "content": "x", "length": 0, "clientId": "u1", "timestamp": 0, "version": 0 },
                "version": 1,
            }
        }))
        .await;
    let broadcast = observer.recv().await?;
    assert_eq!(broadcast["type"], "operation");

    Ok(())
}

#[tokio::test]
async fn missing_token_is_rejected_with_401() -> Result<()> {
    logging();
    let state = ServerState::new(ServerConfig::default());
    let client = TestClient::start(server(Arc::clone(&state))).await?;

    let err = tokio_tungstenite::connect_async(client.socket_url()).await;
    assert!(err.is_err());
    Ok(())
}
