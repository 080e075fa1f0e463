//! Scriptable, recording protocol driver for tests and offline demos.
//!
//! # Why a mock driver?
//!
//! Real drivers need a reachable server, and their timing depends on the
//! network.  `MockDriver` replaces all I/O with in-memory bookkeeping:
//!
//! - `connect` sleeps for a configurable delay (paused-clock friendly) and
//!   then succeeds, fails with a chosen [`DriverError`], or never finishes.
//! - Every `connect`/`disconnect` is appended to a [`CallLog`] shared by all
//!   drivers a [`MockDriverFactory`] builds, so tests can assert the order in
//!   which two sessions' drivers were used.
//! - `inject_fault` makes [`ProtocolDriver::fatal_error`] resolve, which is
//!   how a dropped transport is simulated.
//!
//! # Usage in tests
//!
//! ```ignore
//! let factory = MockDriverFactory::new(ProtocolKind::Rdp, MockBehavior::default());
//! let mut registry = DriverRegistry::new();
//! factory.register_into(&mut registry);
//!
//! let manager = ConnectionManager::new(registry, sink, SessionSettings::default());
//! manager.open(config).await?;
//!
//! let driver = factory.driver(0).unwrap();
//! assert_eq!(driver.connect_count(), 1);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use remdesk_core::{ConnectionConfig, InputEvent, ProtocolKind};
use tokio::sync::watch;

use crate::application::driver::{DriverError, DriverRegistry, ProtocolDriver};

/// How `connect` ends once its delay has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectOutcome {
    #[default]
    Succeed,
    Fail(DriverError),
    /// Never completes; only a timeout or cancellation ends the attempt.
    Hang,
}

/// Script for drivers built by a [`MockDriverFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MockBehavior {
    pub connect_delay: Duration,
    pub outcome: ConnectOutcome,
}

impl MockBehavior {
    /// Succeeds after `delay`.
    pub fn succeed_after(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            outcome: ConnectOutcome::Succeed,
        }
    }

    /// Fails with `error` after `delay`.
    pub fn fail_after(delay: Duration, error: DriverError) -> Self {
        Self {
            connect_delay: delay,
            outcome: ConnectOutcome::Fail(error),
        }
    }

    /// Never finishes connecting.
    pub fn hang() -> Self {
        Self {
            connect_delay: Duration::ZERO,
            outcome: ConnectOutcome::Hang,
        }
    }
}

/// One driver call, tagged with the index of the driver that received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Built(usize),
    ConnectStarted(usize),
    Connected(usize),
    Disconnect(usize),
}

/// Ordered record of driver calls across every driver of one factory.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl CallLog {
    fn push(&self, call: DriverCall) {
        lock(&self.calls).push(call);
    }

    /// Copy of every call so far, oldest first.
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    /// Position of the first occurrence of `call`, if any.
    pub fn position(&self, call: DriverCall) -> Option<usize> {
        lock(&self.calls).iter().position(|c| *c == call)
    }
}

/// In-memory [`ProtocolDriver`] that records every call it receives.
pub struct MockDriver {
    index: usize,
    kind: ProtocolKind,
    behavior: MockBehavior,
    log: CallLog,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    captures: AtomicU64,
    inputs: Mutex<Vec<InputEvent>>,
    fault: watch::Sender<Option<DriverError>>,
}

impl MockDriver {
    /// A standalone driver with its own call log.
    pub fn new(kind: ProtocolKind, behavior: MockBehavior) -> Self {
        Self::with_log(0, kind, behavior, CallLog::default())
    }

    fn with_log(index: usize, kind: ProtocolKind, behavior: MockBehavior, log: CallLog) -> Self {
        let (fault, _) = watch::channel(None);
        Self {
            index,
            kind,
            behavior,
            log,
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            captures: AtomicU64::new(0),
            inputs: Mutex::new(Vec::new()),
            fault,
        }
    }

    /// Construction index within the owning factory.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }

    /// Every input forwarded while connected, in order.
    pub fn inputs(&self) -> Vec<InputEvent> {
        lock(&self.inputs).clone()
    }

    /// Simulates the transport dropping: `fatal_error` resolves with `error`.
    pub fn inject_fault(&self, error: DriverError) {
        self.connected.store(false, Ordering::SeqCst);
        self.fault.send_replace(Some(error));
    }
}

#[async_trait]
impl ProtocolDriver for MockDriver {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<(), DriverError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.log.push(DriverCall::ConnectStarted(self.index));
        tracing::debug!(driver = self.index, endpoint = %config.endpoint(), "mock connect");

        if !self.behavior.connect_delay.is_zero() {
            tokio::time::sleep(self.behavior.connect_delay).await;
        }
        match &self.behavior.outcome {
            ConnectOutcome::Succeed => {
                self.fault.send_replace(None);
                self.connected.store(true, Ordering::SeqCst);
                self.log.push(DriverCall::Connected(self.index));
                Ok(())
            }
            ConnectOutcome::Fail(error) => Err(error.clone()),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.log.push(DriverCall::Disconnect(self.index));
    }

    fn capture_output(&self) -> Vec<u8> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.is_connected() {
            return Vec::new();
        }
        format!("{} frame {n}", self.kind.label()).into_bytes()
    }

    fn send_input(&self, event: &InputEvent) {
        if self.is_connected() {
            lock(&self.inputs).push(event.clone());
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

/// Builds [`MockDriver`]s for one protocol kind and keeps every one it built.
pub struct MockDriverFactory {
    kind: ProtocolKind,
    behavior: Mutex<MockBehavior>,
    log: CallLog,
    built: Mutex<Vec<Arc<MockDriver>>>,
}

impl MockDriverFactory {
    pub fn new(kind: ProtocolKind, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Mutex::new(behavior),
            log: CallLog::default(),
            built: Mutex::new(Vec::new()),
        })
    }

    /// Script applied to drivers built from now on.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Builds the next driver.
    pub fn build(&self) -> Arc<MockDriver> {
        let mut built = lock(&self.built);
        self.log.push(DriverCall::Built(built.len()));
        let driver = Arc::new(MockDriver::with_log(
            built.len(),
            self.kind,
            lock(&self.behavior).clone(),
            self.log.clone(),
        ));
        built.push(Arc::clone(&driver));
        driver
    }

    /// Registers this factory for its protocol kind.
    pub fn register_into(self: &Arc<Self>, registry: &mut DriverRegistry) {
        let factory = Arc::clone(self);
        registry.register(self.kind, move || factory.build() as Arc<dyn ProtocolDriver>);
    }

    /// Number of drivers built so far.
    pub fn construction_count(&self) -> usize {
        lock(&self.built).len()
    }

    /// The `index`-th driver built, if that many exist.
    pub fn driver(&self, index: usize) -> Option<Arc<MockDriver>> {
        lock(&self.built).get(index).cloned()
    }

    /// Call log shared by every driver of this factory.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("lab", "10.0.0.9", None, "bob", "pw", ProtocolKind::Vnc)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_configured_delay() {
        // Arrange
        let driver = MockDriver::new(
            ProtocolKind::Vnc,
            MockBehavior::succeed_after(Duration::from_millis(50)),
        );
        let start = tokio::time::Instant::now();

        // Act
        driver.connect(&config()).await.unwrap();

        // Assert
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(driver.is_connected());
        assert_eq!(driver.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_behavior_returns_scripted_error() {
        let err = DriverError::Authentication("bad password".into());
        let driver = MockDriver::new(ProtocolKind::Vnc, MockBehavior::fail_after(Duration::ZERO, err.clone()));

        assert_eq!(driver.connect(&config()).await, Err(err));
        assert!(!driver.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_completes() {
        let driver = MockDriver::new(ProtocolKind::Vnc, MockBehavior::hang());
        let result = tokio::time::timeout(Duration::from_secs(60), driver.connect(&config())).await;
        assert!(result.is_err(), "hanging connect must only end by timeout");
    }

    #[test]
    fn test_capture_and_input_are_inert_until_connected() {
        let driver = MockDriver::new(ProtocolKind::Ssh, MockBehavior::default());

        assert!(driver.capture_output().is_empty());
        driver.send_input(&InputEvent::KeyboardText("ls".into()));

        assert!(driver.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_connected_driver_records_input_and_renders_frames() {
        let driver = MockDriver::new(ProtocolKind::Ssh, MockBehavior::default());
        driver.connect(&config()).await.unwrap();

        driver.send_input(&InputEvent::TerminalBytes(b"ls\n".to_vec()));
        let frame = driver.capture_output();

        assert_eq!(driver.inputs(), vec![InputEvent::TerminalBytes(b"ls\n".to_vec())]);
        assert_eq!(frame, b"SSH frame 1".to_vec());
    }

    #[tokio::test]
    async fn test_injected_fault_resolves_fatal_error() {
        // Arrange
        let driver = Arc::new(MockDriver::new(ProtocolKind::Rdp, MockBehavior::default()));
        driver.connect(&config()).await.unwrap();
        let mut fatal = tokio_test::task::spawn(driver.fatal_error());
        tokio_test::assert_pending!(fatal.poll());

        // Act
        driver.inject_fault(DriverError::TransportLost("cable pulled".into()));

        // Assert
        assert!(fatal.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(fatal.poll()),
            DriverError::TransportLost("cable pulled".into())
        );
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_factory_shares_call_log_across_drivers() {
        // Arrange
        let factory = MockDriverFactory::new(ProtocolKind::Rdp, MockBehavior::default());
        let mut registry = DriverRegistry::new();
        factory.register_into(&mut registry);

        // Act
        let first = registry.create(ProtocolKind::Rdp).unwrap();
        first.connect(&config()).await.unwrap();
        first.disconnect().await;
        let second = registry.create(ProtocolKind::Rdp).unwrap();
        second.connect(&config()).await.unwrap();

        // Assert
        assert_eq!(factory.construction_count(), 2);
        assert_eq!(
            factory.call_log().calls(),
            vec![
                DriverCall::Built(0),
                DriverCall::ConnectStarted(0),
                DriverCall::Connected(0),
                DriverCall::Disconnect(0),
                DriverCall::Built(1),
                DriverCall::ConnectStarted(1),
                DriverCall::Connected(1),
            ]
        );
        assert!(factory.driver(2).is_none());
    }
}
