//! Shared fixtures for the session integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use remdesk_client::application::events::{SessionEvent, SessionEventSink, SessionId};
use remdesk_client::infrastructure::drivers::mock::{MockBehavior, MockDriverFactory};
use remdesk_client::{ConnectionManager, DriverRegistry, SessionError, SessionSettings};
use remdesk_core::{ConnectionConfig, FrameEvent, ProtocolKind};
use tokio::time::Instant;

/// Sink that keeps every notification together with the (tokio) time it
/// arrived.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Instant, SessionEvent)>>,
}

impl RecordingSink {
    fn push(&self, event: SessionEvent) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }

    pub fn timed(&self) -> Vec<(Instant, SessionEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.timed().into_iter().map(|(_, e)| e).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn for_session(&self, id: SessionId) -> Vec<SessionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.session_id() == id)
            .collect()
    }

    pub fn frame_sequences(&self, id: SessionId) -> Vec<u64> {
        self.for_session(id)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Frame { frame, .. } => Some(frame.sequence),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(SessionId, SessionError)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Failed { session_id, error } => Some((session_id, error)),
                _ => None,
            })
            .collect()
    }
}

impl SessionEventSink for RecordingSink {
    fn on_connected(&self, session_id: SessionId) {
        self.push(SessionEvent::Connected { session_id });
    }

    fn on_disconnected(&self, session_id: SessionId) {
        self.push(SessionEvent::Disconnected { session_id });
    }

    fn on_failed(&self, session_id: SessionId, error: &SessionError) {
        self.push(SessionEvent::Failed {
            session_id,
            error: error.clone(),
        });
    }

    fn on_frame(&self, session_id: SessionId, frame: &FrameEvent) {
        self.push(SessionEvent::Frame {
            session_id,
            frame: frame.clone(),
        });
    }
}

/// Manager over a single mock factory, reporting into a [`RecordingSink`].
pub fn mock_manager(
    factory: &Arc<MockDriverFactory>,
    settings: SessionSettings,
) -> (ConnectionManager, Arc<RecordingSink>) {
    let mut registry = DriverRegistry::new();
    factory.register_into(&mut registry);
    let sink = Arc::new(RecordingSink::default());
    let manager = ConnectionManager::new(registry, Arc::clone(&sink) as Arc<dyn SessionEventSink>, settings);
    (manager, sink)
}

/// RDP factory plus manager with default settings.
pub fn rdp_setup(behavior: MockBehavior) -> (Arc<MockDriverFactory>, ConnectionManager, Arc<RecordingSink>) {
    let factory = MockDriverFactory::new(ProtocolKind::Rdp, behavior);
    let (manager, sink) = mock_manager(&factory, SessionSettings::default());
    (factory, manager, sink)
}

pub fn rdp_profile(name: &str) -> ConnectionConfig {
    ConnectionConfig::new(name, "10.0.0.5", Some(3389), "alice", "pw", ProtocolKind::Rdp)
}
