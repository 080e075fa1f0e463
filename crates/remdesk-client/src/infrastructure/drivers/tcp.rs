//! TCP probe driver: a real network driver without a wire protocol.
//!
//! `TcpProbeDriver` opens a TCP connection to the profile's endpoint and,
//! for protocols whose server speaks first, checks the greeting:
//!
//! | Protocol | Server greeting          |
//! |----------|--------------------------|
//! | VNC      | `RFB xxx.yyy\n`          |
//! | SSH      | `SSH-2.0-<software>\r\n` |
//! | RDP      | none (client speaks first) |
//!
//! It never answers the greeting.  Frames are a plain-text status report
//! (endpoint, greeting, bytes received, last input) so a session can be
//! exercised end to end against a real server.  A server that waits for the
//! client to continue will eventually hang up, which the driver reports
//! through [`ProtocolDriver::fatal_error`] like any other dropped transport.
//!
//! Architecture:
//! - The write half is kept in a `tokio::sync::Mutex<Option<_>>` while
//!   connected; `disconnect` takes it.
//! - The read half is owned by a reader task that counts inbound bytes and
//!   publishes `TransportLost` when the socket closes or errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use remdesk_core::{ConnectionConfig, InputEvent, ProtocolKind};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{watch, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::application::driver::{DriverError, ProtocolDriver};

/// Default time allowed for the server greeting once TCP is up.
pub const DEFAULT_GREETING_TIMEOUT: Duration = Duration::from_secs(5);

/// Greetings longer than this are cut off.
const MAX_GREETING: usize = 255;

/// Prefix the server's first line must start with, if the server speaks first.
pub fn expected_greeting(kind: ProtocolKind) -> Option<&'static str> {
    match kind {
        ProtocolKind::Vnc => Some("RFB "),
        ProtocolKind::Ssh => Some("SSH-"),
        ProtocolKind::Rdp => None,
    }
}

struct Link {
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct ProbeStatus {
    connected: bool,
    endpoint: String,
    username: String,
    greeting: Option<String>,
    last_input: Option<&'static str>,
    inputs: u64,
    frames: u64,
}

/// Driver that proves reachability and reports the link as text frames.
pub struct TcpProbeDriver {
    kind: ProtocolKind,
    greeting_timeout: Duration,
    link: Mutex<Option<Link>>,
    status: StdMutex<ProbeStatus>,
    bytes_in: Arc<AtomicU64>,
    fault: Arc<watch::Sender<Option<DriverError>>>,
}

impl TcpProbeDriver {
    pub fn new(kind: ProtocolKind) -> Self {
        let (fault, _) = watch::channel(None);
        Self {
            kind,
            greeting_timeout: DEFAULT_GREETING_TIMEOUT,
            link: Mutex::new(None),
            status: StdMutex::new(ProbeStatus::default()),
            bytes_in: Arc::new(AtomicU64::new(0)),
            fault: Arc::new(fault),
        }
    }

    /// Overrides how long `connect` waits for the server greeting.
    pub fn with_greeting_timeout(mut self, timeout: Duration) -> Self {
        self.greeting_timeout = timeout;
        self
    }

    /// Server greeting from the last successful connect, if any.
    pub fn greeting(&self) -> Option<String> {
        self.status().greeting.clone()
    }

    /// Bytes received from the server since the last connect.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    fn status(&self) -> MutexGuard<'_, ProbeStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_reader(&self, mut reader: OwnedReadHalf) -> JoinHandle<()> {
        let bytes_in = Arc::clone(&self.bytes_in);
        let fault = Arc::clone(&self.fault);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let cause = loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break "connection closed by remote host".to_string(),
                    Ok(n) => {
                        bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(e) => break e.to_string(),
                }
            };
            warn!(%cause, "probe transport ended");
            fault.send_replace(Some(DriverError::TransportLost(cause)));
        })
    }
}

impl Drop for TcpProbeDriver {
    /// A driver dropped without `disconnect` still releases its socket: the
    /// reader task owns the read half and would otherwise outlive the driver.
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            debug!(protocol = %self.kind, "probe dropped while connected; aborting reader");
            link.reader_task.abort();
        }
    }
}

#[async_trait]
impl ProtocolDriver for TcpProbeDriver {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<(), DriverError> {
        let endpoint = config.endpoint();
        let port = config
            .port_u16()
            .ok_or_else(|| DriverError::Unreachable(format!("invalid port {}", config.port)))?;

        // A second connect replaces the previous link.
        self.disconnect().await;

        let mut stream = TcpStream::connect((config.hostname.as_str(), port))
            .await
            .map_err(|e| DriverError::Unreachable(format!("{endpoint}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle on {endpoint}: {e}");
        }

        let greeting = match expected_greeting(self.kind) {
            Some(prefix) => Some(read_greeting(&mut stream, prefix, self.greeting_timeout).await?),
            None => None,
        };

        self.bytes_in.store(0, Ordering::Relaxed);
        self.fault.send_replace(None);
        let (reader, writer) = stream.into_split();
        let reader_task = self.spawn_reader(reader);
        *self.link.lock().await = Some(Link { writer, reader_task });

        info!(
            protocol = %self.kind,
            %endpoint,
            greeting = greeting.as_deref().unwrap_or("-"),
            "probe connected"
        );
        let mut status = self.status();
        *status = ProbeStatus {
            connected: true,
            endpoint,
            username: config.username.clone(),
            greeting,
            ..ProbeStatus::default()
        };
        Ok(())
    }

    async fn disconnect(&self) {
        let link = self.link.lock().await.take();
        self.status().connected = false;
        let Some(Link { mut writer, reader_task }) = link else {
            return;
        };
        reader_task.abort();
        if let Err(e) = reader_task.await {
            if !e.is_cancelled() {
                warn!("probe reader task ended abnormally: {e}");
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("socket shutdown: {e}");
        }
        debug!(protocol = %self.kind, "probe disconnected");
    }

    fn capture_output(&self) -> Vec<u8> {
        let mut status = self.status();
        if !status.connected {
            return Vec::new();
        }
        status.frames += 1;
        format!(
            "{label} {user}@{endpoint}\n\
             server: {greeting}\n\
             frame: {frame}  bytes received: {bytes}\n\
             input: {inputs} events, last {last}\n",
            label = self.kind.label(),
            user = status.username,
            endpoint = status.endpoint,
            greeting = status.greeting.as_deref().unwrap_or("-"),
            frame = status.frames,
            bytes = self.bytes_received(),
            inputs = status.inputs,
            last = status.last_input.unwrap_or("none"),
        )
        .into_bytes()
    }

    fn send_input(&self, event: &InputEvent) {
        let mut status = self.status();
        if status.connected {
            status.inputs += 1;
            status.last_input = Some(event.kind());
        }
    }

    async fn fatal_error(&self) -> DriverError {
        let mut rx = self.fault.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(error) = current {
                return error;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Reads the server's first line and checks it starts with `prefix`.
async fn read_greeting(
    stream: &mut TcpStream,
    prefix: &str,
    wait: Duration,
) -> Result<String, DriverError> {
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];
    let read = async {
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| DriverError::Protocol(format!("reading server greeting: {e}")))?;
            if n == 0 {
                return Err(DriverError::Protocol(
                    "connection closed before server greeting".into(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&b'\n') || buf.len() >= MAX_GREETING {
                return Ok(());
            }
        }
    };
    time::timeout(wait, read)
        .await
        .map_err(|_| DriverError::Protocol(format!("no server greeting within {wait:?}")))??;

    let text = String::from_utf8_lossy(&buf);
    let line = text.lines().next().unwrap_or_default().trim_end();
    if !line.starts_with(prefix) {
        return Err(DriverError::Protocol(format!(
            "unexpected server greeting {line:?} (expected {prefix:?}...)"
        )));
    }
    Ok(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn config(kind: ProtocolKind, port: u16) -> ConnectionConfig {
        ConnectionConfig::new("probe", "127.0.0.1", Some(i32::from(port)), "alice", "pw", kind)
    }

    #[test]
    fn test_expected_greeting_per_protocol() {
        assert_eq!(expected_greeting(ProtocolKind::Vnc), Some("RFB "));
        assert_eq!(expected_greeting(ProtocolKind::Ssh), Some("SSH-"));
        assert_eq!(expected_greeting(ProtocolKind::Rdp), None);
    }

    #[tokio::test]
    async fn test_ssh_probe_reads_banner_and_renders_status_frame() {
        // Arrange
        let (listener, port) = listener().await;
        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
            sock
        });
        let driver = TcpProbeDriver::new(ProtocolKind::Ssh);

        // Act
        driver.connect(&config(ProtocolKind::Ssh, port)).await.unwrap();
        driver.send_input(&InputEvent::KeyboardText("whoami".into()));
        let frame = String::from_utf8(driver.capture_output()).unwrap();

        // Assert
        assert_eq!(driver.greeting().as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
        assert!(frame.starts_with("SSH alice@127.0.0.1:"), "got {frame}");
        assert!(frame.contains("server: SSH-2.0-OpenSSH_9.6"));
        assert!(frame.contains("frame: 1"));
        assert!(frame.contains("last keyboard"), "got {frame}");

        driver.disconnect().await;
        drop(accept.await.unwrap());
    }

    #[tokio::test]
    async fn test_rdp_probe_needs_no_greeting() {
        let (listener, port) = listener().await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let driver = TcpProbeDriver::new(ProtocolKind::Rdp);

        driver.connect(&config(ProtocolKind::Rdp, port)).await.unwrap();

        assert!(driver.greeting().is_none());
        assert!(!driver.capture_output().is_empty());
        driver.disconnect().await;
        drop(accept.await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_greeting_is_protocol_error() {
        // Arrange: an HTTP server where VNC was expected
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });
        let driver = TcpProbeDriver::new(ProtocolKind::Vnc);

        // Act
        let result = driver.connect(&config(ProtocolKind::Vnc, port)).await;

        // Assert
        assert!(matches!(result, Err(DriverError::Protocol(msg)) if msg.contains("HTTP/1.1")));
        assert!(driver.capture_output().is_empty());
    }

    #[tokio::test]
    async fn test_silent_server_times_out_greeting() {
        let (listener, port) = listener().await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let driver = TcpProbeDriver::new(ProtocolKind::Vnc)
            .with_greeting_timeout(Duration::from_millis(50));

        let result = driver.connect(&config(ProtocolKind::Vnc, port)).await;

        assert!(matches!(result, Err(DriverError::Protocol(msg)) if msg.contains("no server greeting")));
        drop(accept.await.unwrap());
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // Arrange: grab a free port, then close the listener
        let (listener, port) = listener().await;
        drop(listener);
        let driver = TcpProbeDriver::new(ProtocolKind::Rdp);

        // Act
        let result = driver.connect(&config(ProtocolKind::Rdp, port)).await;

        // Assert
        assert!(matches!(result, Err(DriverError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_peer_close_resolves_fatal_error() {
        // Arrange: the server greets, then hangs up
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
        });
        let driver = TcpProbeDriver::new(ProtocolKind::Vnc);
        driver.connect(&config(ProtocolKind::Vnc, port)).await.unwrap();

        // Act
        let cause = time::timeout(Duration::from_secs(5), driver.fatal_error())
            .await
            .expect("fatal_error must resolve after the peer closes");

        // Assert
        assert!(matches!(cause, DriverError::TransportLost(_)));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn test_dropping_connected_driver_stops_reader_task() {
        // Arrange
        let (listener, port) = listener().await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let driver = TcpProbeDriver::new(ProtocolKind::Rdp);
        driver.connect(&config(ProtocolKind::Rdp, port)).await.unwrap();
        let server_side = accept.await.unwrap();
        let bytes_in = Arc::clone(&driver.bytes_in);
        assert_eq!(Arc::strong_count(&bytes_in), 3, "driver, reader task, test");

        // Act: drop without disconnect while the peer keeps the socket open
        drop(driver);

        // Assert: the reader task released its handles
        time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&bytes_in) > 1 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reader task must end when the driver is dropped");
        drop(server_side);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_stops_output() {
        let driver = TcpProbeDriver::new(ProtocolKind::Rdp);
        driver.disconnect().await;

        let (listener, port) = listener().await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        driver.connect(&config(ProtocolKind::Rdp, port)).await.unwrap();
        driver.disconnect().await;
        driver.disconnect().await;

        assert!(driver.capture_output().is_empty());
        driver.send_input(&InputEvent::click(1, 1));
        drop(accept.await.unwrap());
    }
}
