//! Session notifications: the sink contract and per-session FIFO delivery.
//!
//! # Delivery model
//!
//! Each session owns one [`EventDispatcher`]: a bounded `mpsc` queue plus a
//! task that drains it into the [`SessionEventSink`].  Everything a session
//! reports goes through that single queue, which gives per-session FIFO order
//! for free and keeps sink calls off the caller's task.
//!
//! ```text
//! open()/close() ──lifecycle──┐
//!                             ├──► bounded queue ──► dispatcher task ──► sink
//! frame loop ─────frames──────┘
//! ```
//!
//! Lifecycle events (`Connected`, `Disconnected`, `Failed`) are always
//! enqueued, waiting for room if necessary.  Frames are offered with a short
//! timeout and dropped when the sink cannot keep up; a dropped frame never
//! overtakes a later event.
//!
//! [`EventDispatcher::finish`] closes the queue and waits for the task to
//! drain it, so once it returns the sink has seen the session's last event.

use std::sync::Arc;
use std::time::Duration;

use remdesk_core::FrameEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use super::error::SessionError;

/// Identifier of one session (one `open()` call).
pub type SessionId = Uuid;

/// Consumer of session notifications (typically the UI binding layer).
///
/// Calls arrive on a background task, in order, one at a time per session.
/// Implementations should return quickly: while a call is in progress the
/// queue fills up and further frames are dropped.
#[cfg_attr(test, mockall::automock)]
pub trait SessionEventSink: Send + Sync {
    /// The session reached `Connected`.  Always precedes any frame.
    fn on_connected(&self, session_id: SessionId);

    /// A requested teardown finished.  No frame follows.
    fn on_disconnected(&self, session_id: SessionId);

    /// Connecting failed, or a connected transport dropped.  No frame follows.
    fn on_failed(&self, session_id: SessionId, error: &SessionError);

    /// One polled output snapshot.
    fn on_frame(&self, session_id: SessionId, frame: &FrameEvent);
}

/// A notification as an owned value, for channel-based consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        session_id: SessionId,
    },
    Disconnected {
        session_id: SessionId,
    },
    Failed {
        session_id: SessionId,
        error: SessionError,
    },
    Frame {
        session_id: SessionId,
        frame: FrameEvent,
    },
}

impl SessionEvent {
    /// Session the event belongs to.
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Connected { session_id }
            | SessionEvent::Disconnected { session_id }
            | SessionEvent::Failed { session_id, .. }
            | SessionEvent::Frame { session_id, .. } => *session_id,
        }
    }

    /// `true` for `Disconnected` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Disconnected { .. } | SessionEvent::Failed { .. }
        )
    }

    fn deliver(&self, sink: &dyn SessionEventSink) {
        match self {
            SessionEvent::Connected { session_id } => sink.on_connected(*session_id),
            SessionEvent::Disconnected { session_id } => sink.on_disconnected(*session_id),
            SessionEvent::Failed { session_id, error } => sink.on_failed(*session_id, error),
            SessionEvent::Frame { session_id, frame } => sink.on_frame(*session_id, frame),
        }
    }
}

/// Sink that forwards every notification into an unbounded channel.
///
/// Never blocks, so it never causes frames to be dropped; the receiving side
/// decides how to pace itself.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Creates the sink together with the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("session event receiver dropped; discarding event");
        }
    }
}

impl SessionEventSink for ChannelSink {
    fn on_connected(&self, session_id: SessionId) {
        self.forward(SessionEvent::Connected { session_id });
    }

    fn on_disconnected(&self, session_id: SessionId) {
        self.forward(SessionEvent::Disconnected { session_id });
    }

    fn on_failed(&self, session_id: SessionId, error: &SessionError) {
        self.forward(SessionEvent::Failed {
            session_id,
            error: error.clone(),
        });
    }

    fn on_frame(&self, session_id: SessionId, frame: &FrameEvent) {
        self.forward(SessionEvent::Frame {
            session_id,
            frame: frame.clone(),
        });
    }
}

/// Result of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOffer {
    /// Enqueued; the sink will see it.
    Accepted,
    /// The queue stayed full for the whole timeout.
    Dropped,
    /// The dispatcher is gone; the session is being torn down.
    Closed,
}

/// Cloneable producer handle onto one session's queue.
#[derive(Clone)]
pub struct EventPublisher {
    session_id: SessionId,
    tx: mpsc::Sender<SessionEvent>,
    frame_timeout: Duration,
}

impl EventPublisher {
    /// Session this publisher reports for.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Enqueues `Connected`.
    pub async fn connected(&self) {
        self.lifecycle(SessionEvent::Connected {
            session_id: self.session_id,
        })
        .await;
    }

    /// Enqueues `Disconnected`.
    pub async fn disconnected(&self) {
        self.lifecycle(SessionEvent::Disconnected {
            session_id: self.session_id,
        })
        .await;
    }

    /// Enqueues `Failed`.
    pub async fn failed(&self, error: SessionError) {
        self.lifecycle(SessionEvent::Failed {
            session_id: self.session_id,
            error,
        })
        .await;
    }

    /// Offers a frame, waiting at most the configured timeout for room.
    pub async fn offer_frame(&self, frame: FrameEvent) -> FrameOffer {
        let event = SessionEvent::Frame {
            session_id: self.session_id,
            frame,
        };
        match self.tx.send_timeout(event, self.frame_timeout).await {
            Ok(()) => FrameOffer::Accepted,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => FrameOffer::Dropped,
            Err(mpsc::error::SendTimeoutError::Closed(_)) => FrameOffer::Closed,
        }
    }

    async fn lifecycle(&self, event: SessionEvent) {
        if self.tx.send(event).await.is_err() {
            warn!(session_id = %self.session_id, "event dispatcher stopped before lifecycle event");
        }
    }
}

/// Owns one session's queue and the task draining it into the sink.
pub struct EventDispatcher {
    publisher: EventPublisher,
    task: JoinHandle<()>,
}

impl EventDispatcher {
    /// Spawns the delivery task.  `capacity` is clamped to at least 1.
    pub fn spawn(
        session_id: SessionId,
        sink: Arc<dyn SessionEventSink>,
        capacity: usize,
        frame_timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SessionEvent>(capacity.max(1));
        let span = tracing::debug_span!("session_events", %session_id);
        let task = tokio::spawn(
            async move {
                while let Some(event) = rx.recv().await {
                    event.deliver(sink.as_ref());
                }
                debug!("event queue drained");
            }
            .instrument(span),
        );
        Self {
            publisher: EventPublisher {
                session_id,
                tx,
                frame_timeout,
            },
            task,
        }
    }

    /// Producer handle for this session's queue.
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// Closes the queue and waits until every enqueued event reached the sink.
    ///
    /// Other [`EventPublisher`] clones keep the queue open, so callers drop
    /// (or join the tasks holding) them first.
    pub async fn finish(self) {
        let EventDispatcher { publisher, task } = self;
        drop(publisher);
        if let Err(e) = task.await {
            warn!("event dispatcher task ended abnormally: {e}");
        }
    }
}
