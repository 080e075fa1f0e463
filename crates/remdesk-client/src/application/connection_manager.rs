//! ConnectionManager: opens, supervises, and closes the single active session.
//!
//! # Ownership
//!
//! The manager owns at most one live session.  A session owns its driver, its
//! state machine, its event dispatcher, and (once connected) its frame loop.
//! Nothing is shared between sessions; opening a new one fully closes the old
//! one first, so two drivers are never live at the same time.
//!
//! # Serialisation
//!
//! The session slot sits behind a `tokio::sync::Mutex`.  Every operation that
//! changes a session's lifecycle (`open`, `close`, fault teardown) runs with
//! the slot locked, which makes `connect`/`disconnect` mutually exclusive.
//! The lock is *not* held while the driver connects, so `close()` can cancel
//! an attempt that is still in flight.  Input forwarding takes the lock only
//! for the duration of one `send_input` call; frame capture never takes it.
//!
//! # Open
//!
//! ```text
//! validate ─► [lock] close previous ─► create driver ─► Idle→Connecting
//!          ─► spawn connect task + completion task ─► [unlock]
//!
//! completion task: await outcome ─► [lock] still ours?
//!          ─► Connected + OnConnected + frame loop
//!          └► Failed + disconnect + OnFailed
//!          ─► hand the result to open()
//! ```
//!
//! The completion task runs whether or not the `open()` future is still
//! being polled, so a caller that stops waiting (a timeout, a `select!`)
//! leaves a session that still ends `Connected` or `Failed` with its events
//! delivered.  `close()` is how an attempt is abandoned.
//!
//! # Close
//!
//! ```text
//! Connecting: stop signal ─► join connect task ─► Failed(Cancelled) ─► disconnect ─► OnFailed
//! Connected:  Disconnecting ─► stop signal ─► join frame loop ─► disconnect
//!             ─► Disconnected ─► OnDisconnected
//! ```
//!
//! Both paths finish by draining the session's event queue, so when `close()`
//! returns the sink has already received the terminal event and nothing
//! after it.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use remdesk_core::{default_port, validate, ConnectionConfig, FrameSequence, InputEvent, ProtocolKind};
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::driver::{DriverError, DriverRegistry, ProtocolDriver};
use super::error::{ConnectError, SessionError};
use super::events::{EventDispatcher, EventPublisher, SessionEventSink, SessionId};
use super::frame_loop::{FaultHandler, FrameLoop, FrameLoopHandle, LoopExit, DEFAULT_FRAME_INTERVAL};
use super::state::{SessionState, SessionStateMachine};

/// Runtime tuning for sessions created by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Period between frame captures.
    pub frame_interval: Duration,
    /// Upper bound on `driver.connect`.
    pub connect_timeout: Duration,
    /// Capacity of each session's event queue.
    pub event_queue_capacity: usize,
    /// How long the frame loop waits for queue space before dropping a frame.
    pub sink_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            event_queue_capacity: 64,
            sink_timeout: Duration::from_millis(100),
        }
    }
}

/// Returned by a successful [`ConnectionManager::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub profile_id: Uuid,
    pub protocol: ProtocolKind,
    /// Seconds since the Unix epoch; the profile store records this as
    /// `last_connected`.
    pub connected_at: u64,
}

/// Point-in-time view of a session for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub profile_id: Uuid,
    pub display_name: String,
    pub protocol: ProtocolKind,
    pub state: SessionState,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub connected_at: Option<u64>,
    #[serde(skip)]
    pub last_error: Option<SessionError>,
    pub frames_delivered: u64,
}

/// How a connected session is being torn down.
enum Teardown {
    Requested,
    Fault(DriverError),
}

/// Runtime state for the live session.
struct ActiveSession {
    id: SessionId,
    config: ConnectionConfig,
    created_at: u64,
    connected_at: Option<u64>,
    state: SessionStateMachine,
    driver: Arc<dyn ProtocolDriver>,
    stop: watch::Sender<bool>,
    connect_task: Option<JoinHandle<()>>,
    frame_loop: Option<FrameLoopHandle>,
    frames: Option<Arc<FrameSequence>>,
    events: EventDispatcher,
    last_error: Option<SessionError>,
    span: tracing::Span,
}

impl ActiveSession {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            profile_id: self.config.id,
            display_name: self.config.display_name.clone(),
            protocol: self.config.protocol,
            state: self.state.current(),
            created_at: self.created_at,
            connected_at: self.connected_at,
            last_error: self.last_error.clone(),
            frames_delivered: self.frames.as_ref().map_or(0, |f| f.delivered()),
        }
    }

    fn publisher(&self) -> EventPublisher {
        self.events.publisher()
    }

    /// Marks a connect attempt failed, releases the driver, and reports it.
    async fn fail_connect(mut self, error: SessionError) -> SessionSnapshot {
        if let Err(e) = self.state.transition(SessionState::Failed) {
            warn!(parent: &self.span, error = %e, "unexpected state while failing connect");
        }
        self.stop.send_replace(true);
        if let Some(task) = self.connect_task.take() {
            if let Err(e) = task.await {
                warn!(parent: &self.span, "connect task ended abnormally: {e}");
            }
        }
        self.driver.disconnect().await;
        self.last_error = Some(error.clone());
        warn!(parent: &self.span, error = %error, "session failed to connect");
        self.publisher().failed(error).await;
        self.finish().await
    }

    /// Stops the frame loop, disconnects the driver, and reports the outcome.
    ///
    /// A fault the frame loop saw before it was stopped wins over a requested
    /// close: the session ends `Failed` rather than `Disconnected`.
    async fn shut_down(mut self, mut how: Teardown) -> SessionSnapshot {
        if let Err(e) = self.state.transition(SessionState::Disconnecting) {
            warn!(parent: &self.span, error = %e, "unexpected state while disconnecting");
        }
        self.stop.send_replace(true);
        if let Some(frame_loop) = self.frame_loop.take() {
            let exit = frame_loop.join().await;
            debug!(parent: &self.span, ?exit, "frame loop joined");
            if let LoopExit::Fault(cause) = exit {
                if matches!(how, Teardown::Requested) {
                    debug!(parent: &self.span, "transport had already failed; reporting the fault");
                    how = Teardown::Fault(cause);
                }
            }
        }
        self.driver.disconnect().await;

        match how {
            Teardown::Requested => {
                if let Err(e) = self.state.transition(SessionState::Disconnected) {
                    warn!(parent: &self.span, error = %e, "unexpected state after disconnect");
                }
                info!(parent: &self.span, "session disconnected");
                self.publisher().disconnected().await;
            }
            Teardown::Fault(cause) => {
                let error = SessionError::Transport(cause);
                if let Err(e) = self.state.transition(SessionState::Failed) {
                    warn!(parent: &self.span, error = %e, "unexpected state after transport failure");
                }
                self.last_error = Some(error.clone());
                warn!(parent: &self.span, error = %error, "session failed");
                self.publisher().failed(error).await;
            }
        }
        self.finish().await
    }

    /// Closes whatever state the session is in.
    async fn close(self) -> SessionSnapshot {
        match self.state.current() {
            SessionState::Connecting => {
                self.fail_connect(SessionError::Connect(ConnectError::Cancelled))
                    .await
            }
            SessionState::Connected => self.shut_down(Teardown::Requested).await,
            _ => {
                // Idle or already terminal: nothing is live, but make sure
                // the driver is released and the queue drained.
                self.stop.send_replace(true);
                self.driver.disconnect().await;
                self.finish().await
            }
        }
    }

    /// Drains the event queue and returns the final snapshot.
    async fn finish(self) -> SessionSnapshot {
        let snapshot = self.snapshot();
        let ActiveSession { events, .. } = self;
        events.finish().await;
        snapshot
    }
}

struct Inner {
    registry: DriverRegistry,
    sink: Arc<dyn SessionEventSink>,
    settings: SessionSettings,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveSession>,
    last: Option<SessionSnapshot>,
}

impl Slot {
    fn take_if(&mut self, id: SessionId, state: SessionState) -> Option<ActiveSession> {
        match &self.active {
            Some(s) if s.id == id && s.state.current() == state => self.active.take(),
            _ => None,
        }
    }
}

/// Orchestrates one remote session at a time.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager that builds drivers from `registry` and reports to
    /// `sink`.
    pub fn new(
        registry: DriverRegistry,
        sink: Arc<dyn SessionEventSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                sink,
                settings,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Well-known port for `kind`.
    pub fn default_port(kind: ProtocolKind) -> u16 {
        default_port(kind)
    }

    /// `true` when `config` has a hostname and an in-range port.  No I/O.
    pub fn validate(config: &ConnectionConfig) -> bool {
        validate(config).is_ok()
    }

    /// Settings applied to every session.
    pub fn settings(&self) -> SessionSettings {
        self.inner.settings
    }

    /// Protocols this manager can open.
    pub fn supported_protocols(&self) -> Vec<ProtocolKind> {
        self.inner.registry.kinds()
    }

    /// Opens a session for `config`, closing any existing one first.
    ///
    /// On success the session is `Connected`, its frame loop is running, and
    /// `on_connected` has been queued for the sink.
    ///
    /// Dropping the returned future does not abandon the attempt: the session
    /// still settles in the background and reports through the sink.  Use
    /// [`close`](Self::close) to cancel it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidConfig`] – no driver was created.
    /// - [`SessionError::UnsupportedProtocol`] – no driver was created.
    /// - [`SessionError::Connect`] – the driver failed, timed out, or the
    ///   attempt was cancelled by `close()`/a newer `open()`.  The session
    ///   ended `Failed`, its driver was released, and `on_failed` was queued.
    pub async fn open(&self, config: ConnectionConfig) -> Result<SessionHandle, SessionError> {
        if let Err(issue) = validate(&config) {
            warn!(profile = %config.display_name, %issue, "rejecting invalid connection config");
            return Err(SessionError::InvalidConfig(issue));
        }
        if !self.inner.registry.supports(config.protocol) {
            return Err(SessionError::UnsupportedProtocol(config.protocol));
        }

        let settings = self.inner.settings;
        let result_rx = {
            let mut slot = self.inner.slot.lock().await;
            if let Some(previous) = slot.active.take() {
                info!(session_id = %previous.id, "closing previous session before opening a new one");
                slot.last = Some(previous.close().await);
            }
            let driver = self
                .inner
                .registry
                .create(config.protocol)
                .ok_or(SessionError::UnsupportedProtocol(config.protocol))?;

            let session_id = Uuid::new_v4();
            let span = tracing::info_span!(
                "session",
                %session_id,
                protocol = %config.protocol,
                endpoint = %config.endpoint(),
            );
            let events = EventDispatcher::spawn(
                session_id,
                Arc::clone(&self.inner.sink),
                settings.event_queue_capacity,
                settings.sink_timeout,
            );
            let (stop, stop_rx) = watch::channel(false);
            let mut session = ActiveSession {
                id: session_id,
                config: config.clone(),
                created_at: unix_now(),
                connected_at: None,
                state: SessionStateMachine::new(),
                driver: Arc::clone(&driver),
                stop,
                connect_task: None,
                frame_loop: None,
                frames: None,
                events,
                last_error: None,
                span: span.clone(),
            };
            session.state.begin_connect()?;
            info!(parent: &span, user = %config.username, "connecting");

            let (outcome_tx, outcome_rx) = oneshot::channel();
            session.connect_task = Some(tokio::spawn(
                connect_attempt(driver, config, settings.connect_timeout, stop_rx, outcome_tx)
                    .instrument(span.clone()),
            ));
            let (result_tx, result_rx) = oneshot::channel();
            tokio::spawn(
                complete_connect(Arc::downgrade(&self.inner), session_id, outcome_rx, result_tx)
                    .instrument(span),
            );
            slot.active = Some(session);
            result_rx
        };

        result_rx
            .await
            .unwrap_or(Err(SessionError::Connect(ConnectError::Cancelled)))
    }

    /// Closes the active session, if any.  Idempotent.
    ///
    /// Cancels an in-flight connect attempt, stops and joins the frame loop,
    /// and disconnects the driver.  When this returns no further driver call
    /// is made and no further event reaches the sink for that session.
    pub async fn close(&self) {
        let mut slot = self.inner.slot.lock().await;
        match slot.active.take() {
            Some(session) => {
                info!(session_id = %session.id, state = ?session.state.current(), "closing session");
                slot.last = Some(session.close().await);
            }
            None => debug!("close requested with no active session"),
        }
    }

    /// Forwards `event` to the driver when the session is `Connected`;
    /// otherwise does nothing.
    pub async fn send_input(&self, event: InputEvent) {
        let slot = self.inner.slot.lock().await;
        match slot.active.as_ref() {
            Some(session) if session.state.current() == SessionState::Connected => {
                debug!(parent: &session.span, kind = event.kind(), "forwarding input");
                session.driver.send_input(&event);
            }
            _ => debug!(kind = event.kind(), "ignoring input; no connected session"),
        }
    }

    /// Latest driver output when `Connected`; an empty buffer otherwise.
    pub async fn capture_output(&self) -> Vec<u8> {
        let slot = self.inner.slot.lock().await;
        match slot.active.as_ref() {
            Some(session) if session.state.current() == SessionState::Connected => {
                session.driver.capture_output()
            }
            _ => Vec::new(),
        }
    }

    /// State of the active session, else the final state of the last one,
    /// else `Idle`.
    pub async fn state(&self) -> SessionState {
        let slot = self.inner.slot.lock().await;
        match (&slot.active, &slot.last) {
            (Some(active), _) => active.state.current(),
            (None, Some(last)) => last.state,
            (None, None) => SessionState::Idle,
        }
    }

    /// Snapshot of the active session, else of the last finished one.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let slot = self.inner.slot.lock().await;
        slot.active
            .as_ref()
            .map(ActiveSession::snapshot)
            .or_else(|| slot.last.clone())
    }
}

/// Runs `driver.connect` against the timeout and the stop signal and reports
/// the outcome.  Dropping the connect future is how an attempt is cancelled.
async fn connect_attempt(
    driver: Arc<dyn ProtocolDriver>,
    config: ConnectionConfig,
    timeout: Duration,
    mut stop: watch::Receiver<bool>,
    outcome_tx: oneshot::Sender<Result<(), ConnectError>>,
) {
    let attempt = time::timeout(timeout, driver.connect(&config));
    let outcome = tokio::select! {
        biased;
        _ = stopped(&mut stop) => Err(ConnectError::Cancelled),
        result = attempt => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectError::Driver(e)),
            Err(_) => Err(ConnectError::Timeout(timeout)),
        },
    };
    debug!(ok = outcome.is_ok(), "connect attempt finished");
    // The receiver is gone if the caller abandoned `open()`.
    let _ = outcome_tx.send(outcome);
}

/// Waits for the connect outcome, settles the session, and hands the result
/// to the `open()` caller if it is still listening.
async fn complete_connect(
    inner: Weak<Inner>,
    session_id: SessionId,
    outcome_rx: oneshot::Receiver<Result<(), ConnectError>>,
    result_tx: oneshot::Sender<Result<SessionHandle, SessionError>>,
) {
    let outcome = outcome_rx.await.unwrap_or(Err(ConnectError::Cancelled));
    let Some(inner) = inner.upgrade() else {
        debug!("manager dropped before the connect attempt finished");
        return;
    };
    let result = settle_connect(&inner, session_id, outcome).await;
    if result_tx.send(result).is_err() {
        debug!("open() caller stopped waiting; session settled without it");
    }
}

/// Moves a `Connecting` session to `Connected` (starting its frame loop) or
/// to `Failed`.
async fn settle_connect(
    inner: &Arc<Inner>,
    session_id: SessionId,
    outcome: Result<(), ConnectError>,
) -> Result<SessionHandle, SessionError> {
    let mut slot = inner.slot.lock().await;
    let Some(mut session) = slot.take_if(session_id, SessionState::Connecting) else {
        // close() or a newer open() already tore this attempt down and
        // reported it to the sink.
        debug!("connect attempt superseded");
        return Err(SessionError::Connect(ConnectError::Cancelled));
    };
    if let Some(task) = session.connect_task.take() {
        if let Err(e) = task.await {
            warn!(parent: &session.span, "connect task ended abnormally: {e}");
        }
    }

    match outcome {
        Ok(()) => {
            if let Err(e) = session.state.transition(SessionState::Connected) {
                slot.last = Some(session.fail_connect(e.clone()).await);
                return Err(e);
            }
            let connected_at = unix_now();
            session.connected_at = Some(connected_at);
            info!(parent: &session.span, "session connected");
            session.publisher().connected().await;

            let frame_loop = FrameLoop::new(inner.settings.frame_interval).start(
                Arc::clone(&session.driver),
                session.publisher(),
                session.stop.subscribe(),
                fault_handler(Arc::downgrade(inner), session_id),
            );
            session.frames = Some(frame_loop.sequence());
            session.frame_loop = Some(frame_loop);

            let handle = SessionHandle {
                session_id,
                profile_id: session.config.id,
                protocol: session.config.protocol,
                connected_at,
            };
            slot.active = Some(session);
            Ok(handle)
        }
        Err(cause) => {
            let error = SessionError::Connect(cause);
            slot.last = Some(session.fail_connect(error.clone()).await);
            Err(error)
        }
    }
}

/// Resolves once `stop` is `true` or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Builds the frame loop's fault callback.  It only holds a weak reference so
/// a dropped manager is not kept alive by its own session.
fn fault_handler(inner: Weak<Inner>, session_id: SessionId) -> FaultHandler {
    Box::new(move |cause| {
        tokio::spawn(async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut slot = inner.slot.lock().await;
            match slot.take_if(session_id, SessionState::Connected) {
                Some(session) => {
                    slot.last = Some(session.shut_down(Teardown::Fault(cause)).await);
                }
                None => {
                    debug!(%session_id, error = %cause, "session already torn down; fault reported there");
                }
            }
        });
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
