//! Integration tests for the job event channel.
//!
//! Each test runs an in-process WebSocket peer and drives the protocol from
//! the server side: application pings must be answered with pongs and never
//! reach the caller's callback, job-state frames must reach the callback and
//! never produce a reply, and every disconnect path must surface as a
//! terminal error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use farm_types::{ControlFrame, FrameRange, Job, JobState, StreamFrame};
use farm_worker::stream::{JobEventChannel, StreamError};

fn test_job(state: JobState) -> Job {
    Job {
        id: "job_1".to_string(),
        state,
        frame_range: FrameRange::new(1, 240),
        parallelism: 4,
        container_name: "blender".to_string(),
        scene_url: None,
        sequence_url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn frame_text(frame: &StreamFrame) -> Message {
    Message::Text(serde_json::to_string(frame).unwrap().into())
}

/// Bind a listener and return its ws:// endpoint.
async fn ws_endpoint() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    (listener, endpoint)
}

#[tokio::test]
async fn pings_get_pongs_and_job_states_reach_the_callback() {
    let (listener, endpoint) = ws_endpoint().await;

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        // Job state first: the subscriber must not reply to it, so the first
        // message we ever receive has to be the pong for the ping below.
        ws.send(frame_text(&StreamFrame::JobState(test_job(JobState::Running))))
            .await
            .unwrap();
        ws.send(frame_text(&StreamFrame::Control(ControlFrame::Ping)))
            .await
            .unwrap();
        ws.send(frame_text(&StreamFrame::JobState(test_job(
            JobState::Completed,
        ))))
        .await
        .unwrap();
        ws.send(Message::Close(None)).await.unwrap();

        // Drain what the subscriber sent; only text frames count.
        let mut texts = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                texts.push(text.to_string());
            }
        }
        texts
    });

    let channel = JobEventChannel::new(endpoint, Duration::from_secs(1));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let result = {
        let seen = Arc::clone(&seen);
        channel
            .listen(shutdown_rx, move |job| {
                seen.lock().unwrap().push(job.state);
            })
            .await
    };

    // Peer-initiated close is a terminal error, not a clean exit.
    assert!(matches!(result, Err(StreamError::Closed)));

    // Both job states reached the callback, in order; the ping did not.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![JobState::Running, JobState::Completed]
    );

    // Exactly one reply: the pong.
    let texts = server.await.unwrap();
    assert_eq!(texts.len(), 1);
    let reply: StreamFrame = serde_json::from_str(&texts[0]).unwrap();
    assert!(matches!(reply, StreamFrame::Control(ControlFrame::Pong)));
}

#[tokio::test]
async fn shutdown_initiates_a_clean_close() {
    let (listener, endpoint) = ws_endpoint().await;

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        // Keep reading; the library completes the close handshake for us.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let channel = JobEventChannel::new(endpoint, Duration::from_secs(5));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listen = tokio::spawn(async move { channel.listen(shutdown_rx, |_| {}).await });

    // Give the subscription a moment to connect, then ask it to stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    listen.await.unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn unresponsive_peer_forces_the_close_timeout() {
    let (listener, endpoint) = ws_endpoint().await;

    let _server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let _ws = accept_async(socket).await.unwrap();

        // Hold the connection open without ever reading: the close
        // handshake can never complete.
        std::future::pending::<()>().await;
    });

    let channel = JobEventChannel::new(endpoint, Duration::from_millis(100));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listen = tokio::spawn(async move { channel.listen(shutdown_rx, |_| {}).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let result = listen.await.unwrap();
    assert!(matches!(result, Err(StreamError::CloseTimeout)));
}

#[tokio::test]
async fn abrupt_disconnect_surfaces_a_terminal_error() {
    let (listener, endpoint) = ws_endpoint().await;

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let ws = accept_async(socket).await.unwrap();
        drop(ws);
    });

    let channel = JobEventChannel::new(endpoint, Duration::from_secs(1));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = channel.listen(shutdown_rx, |_| {}).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn undecodable_frames_end_the_subscription() {
    let (listener, endpoint) = ws_endpoint().await;

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        ws.send(Message::Text("{\"not\": \"a frame\"}".into()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let channel = JobEventChannel::new(endpoint, Duration::from_secs(1));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = channel.listen(shutdown_rx, |_| {}).await;
    assert!(matches!(result, Err(StreamError::Decode(_))));
}
