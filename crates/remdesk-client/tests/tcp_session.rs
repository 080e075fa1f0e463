//! End-to-end tests: `ConnectionManager` + `TcpProbeDriver` against local
//! TCP listeners.
//!
//! These use the real clock and real sockets, with short frame intervals so
//! each test finishes in well under a second.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingSink;
use remdesk_client::application::events::{SessionEvent, SessionEventSink};
use remdesk_client::infrastructure::drivers::default_registry;
use remdesk_client::{
    ConnectError, ConnectionManager, DriverError, SessionError, SessionSettings, SessionState,
};
use remdesk_core::{ConnectionConfig, ProtocolKind};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time;

fn fast_settings() -> SessionSettings {
    SessionSettings {
        frame_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        ..SessionSettings::default()
    }
}

fn manager() -> (ConnectionManager, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let manager = ConnectionManager::new(
        default_registry(),
        Arc::clone(&sink) as Arc<dyn SessionEventSink>,
        fast_settings(),
    );
    (manager, sink)
}

async fn listener() -> (TcpListener, ConnectionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cfg = ConnectionConfig::new("local", "127.0.0.1", Some(i32::from(port)), "alice", "pw", ProtocolKind::Vnc);
    (listener, cfg)
}

#[tokio::test]
async fn test_vnc_session_streams_status_frames_until_closed() {
    // Arrange: a server that greets and then stays silent
    let (listener, cfg) = listener().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        sock
    });
    let (manager, sink) = manager();

    // Act
    let handle = manager.open(cfg).await.expect("open");
    time::sleep(Duration::from_millis(150)).await;
    manager.close().await;

    // Assert
    let seqs = sink.frame_sequences(handle.session_id);
    assert!(seqs.len() >= 2, "expected several frames, got {seqs:?}");
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
    let first_frame = sink
        .for_session(handle.session_id)
        .into_iter()
        .find_map(|e| match e {
            SessionEvent::Frame { frame, .. } => Some(frame),
            _ => None,
        })
        .expect("a frame");
    let text = String::from_utf8(first_frame.payload).expect("utf-8 status frame");
    assert!(text.contains("server: RFB 003.008"), "got {text}");
    assert_eq!(manager.state().await, SessionState::Disconnected);

    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_server_hangup_fails_session_with_transport_error() {
    // Arrange: the server greets and disconnects after a short while
    let (listener, cfg) = listener().await;
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"RFB 003.008\n").await.unwrap();
        time::sleep(Duration::from_millis(60)).await;
    });
    let (manager, sink) = manager();

    // Act
    let handle = manager.open(cfg).await.expect("open");
    time::sleep(Duration::from_millis(300)).await;

    // Assert
    assert_eq!(manager.state().await, SessionState::Failed);
    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, handle.session_id);
    assert!(matches!(
        &failures[0].1,
        SessionError::Transport(DriverError::TransportLost(_))
    ));
    let events = sink.for_session(handle.session_id);
    assert!(events.last().is_some_and(SessionEvent::is_terminal));
}

#[tokio::test]
async fn test_refused_endpoint_fails_open() {
    let (listener, cfg) = listener().await;
    drop(listener);
    let (manager, sink) = manager();

    let result = manager.open(cfg).await;

    assert!(matches!(
        result,
        Err(SessionError::Connect(ConnectError::Driver(DriverError::Unreachable(_))))
    ));
    assert_eq!(sink.failures().len(), 1);
    assert_eq!(manager.state().await, SessionState::Failed);
}
