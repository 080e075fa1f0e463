//! FrameLoop: periodic, cancellable capture-and-notify cycle.
//!
//! While a session is `Connected` the loop wakes every `interval`, asks the
//! driver for its latest output, stamps it with the next sequence number, and
//! offers it to the session's event queue.
//!
//! # Stopping
//!
//! The loop watches the session's stop signal (a `watch::Receiver<bool>`) and
//! the driver's [`ProtocolDriver::fatal_error`] future, with priority in that
//! order ahead of the tick.  It exits when:
//!
//! - the stop signal flips to `true` (`close()`),
//! - the stop sender is dropped (the owning session was destroyed),
//! - the driver reports a fatal error (the error is handed to `on_fault`),
//! - the event queue is closed.
//!
//! Teardown sends the stop signal and then awaits [`FrameLoopHandle::join`]
//! *before* calling `driver.disconnect()`.  Any capture that is in flight at
//! that moment finishes first; no capture starts after the stop is seen.

use std::sync::Arc;
use std::time::Duration;

use remdesk_core::{FrameEvent, FrameSequence};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn, Instrument};

use super::driver::{DriverError, ProtocolDriver};
use super::events::{EventPublisher, FrameOffer};

/// Default interval between captures.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_secs(1);

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop signal received, or the owning session went away.
    Stopped,
    /// The driver reported a fatal error.
    Fault(DriverError),
    /// The event queue closed underneath the loop.
    QueueClosed,
}

/// Callback invoked (once) from the loop task when the driver faults.
pub type FaultHandler = Box<dyn FnOnce(DriverError) + Send + 'static>;

/// Running loop: the task plus its frame counter.
pub struct FrameLoopHandle {
    task: JoinHandle<LoopExit>,
    sequence: Arc<FrameSequence>,
}

impl FrameLoopHandle {
    /// Frames delivered to the event queue so far.
    pub fn frames_delivered(&self) -> u64 {
        self.sequence.delivered()
    }

    /// Shared view of the frame counter, for snapshots.
    pub fn sequence(&self) -> Arc<FrameSequence> {
        Arc::clone(&self.sequence)
    }

    /// Waits for the loop task to finish.  Call after signalling stop.
    pub async fn join(self) -> LoopExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("frame loop task ended abnormally: {e}");
                LoopExit::Stopped
            }
        }
    }
}

/// Loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameLoop {
    interval: Duration,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self {
            interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl FrameLoop {
    /// Loop that captures every `interval`.  A zero interval is raised to 1 ms.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Capture period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the loop.  The first capture happens one interval after start.
    pub fn start(
        self,
        driver: Arc<dyn ProtocolDriver>,
        publisher: EventPublisher,
        mut stop: watch::Receiver<bool>,
        on_fault: FaultHandler,
    ) -> FrameLoopHandle {
        let sequence = Arc::new(FrameSequence::new());
        let counter = Arc::clone(&sequence);
        let period = self.interval;
        let span = tracing::debug_span!("frame_loop", session_id = %publisher.session_id());

        let task = tokio::spawn(
            async move {
                let fatal = driver.fatal_error();
                tokio::pin!(fatal);

                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut dropped: u64 = 0;

                debug!(?period, "frame loop started");
                let exit = loop {
                    if *stop.borrow() {
                        break LoopExit::Stopped;
                    }

                    tokio::select! {
                        biased;
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break LoopExit::Stopped;
                            }
                            continue;
                        }
                        err = &mut fatal => {
                            warn!(error = %err, "driver reported fatal error");
                            on_fault(err.clone());
                            break LoopExit::Fault(err);
                        }
                        _ = ticker.tick() => {}
                    }

                    if *stop.borrow() {
                        break LoopExit::Stopped;
                    }

                    let payload = driver.capture_output();
                    let frame = FrameEvent::new(counter.peek(), payload);
                    match publisher.offer_frame(frame).await {
                        FrameOffer::Accepted => {
                            let seq = counter.commit();
                            trace!(seq, "frame queued");
                        }
                        FrameOffer::Dropped => {
                            dropped += 1;
                            debug!(dropped, "event sink is slow; frame dropped");
                        }
                        FrameOffer::Closed => break LoopExit::QueueClosed,
                    }
                };
                debug!(?exit, delivered = counter.delivered(), dropped, "frame loop stopped");
                exit
            }
            .instrument(span),
        );

        FrameLoopHandle { task, sequence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{EventDispatcher, SessionEventSink, SessionId};
    use crate::application::error::SessionError;
    use async_trait::async_trait;
    use remdesk_core::{ConnectionConfig, InputEvent, ProtocolKind};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingDriver {
        captures: AtomicU64,
        fault: Mutex<Option<tokio::sync::oneshot::Receiver<DriverError>>>,
    }

    #[async_trait]
    impl ProtocolDriver for CountingDriver {
        fn kind(&self) -> ProtocolKind {
            ProtocolKind::Vnc
        }
        async fn connect(&self, _: &ConnectionConfig) -> Result<(), DriverError> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn capture_output(&self) -> Vec<u8> {
            let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
            format!("frame {n}").into_bytes()
        }
        fn send_input(&self, _: &InputEvent) {}
        async fn fatal_error(&self) -> DriverError {
            let rx = self.fault.lock().unwrap().take();
            match rx {
                Some(rx) => match rx.await {
                    Ok(err) => err,
                    Err(_) => std::future::pending().await,
                },
                None => std::future::pending().await,
            }
        }
    }

    #[derive(Default)]
    struct FrameSink {
        sequences: Mutex<Vec<u64>>,
    }

    impl SessionEventSink for FrameSink {
        fn on_connected(&self, _: SessionId) {}
        fn on_disconnected(&self, _: SessionId) {}
        fn on_failed(&self, _: SessionId, _: &SessionError) {}
        fn on_frame(&self, _: SessionId, frame: &FrameEvent) {
            self.sequences.lock().unwrap().push(frame.sequence);
        }
    }

    fn dispatcher(sink: &Arc<FrameSink>) -> EventDispatcher {
        EventDispatcher::spawn(
            Uuid::new_v4(),
            Arc::clone(sink) as Arc<dyn SessionEventSink>,
            16,
            Duration::from_millis(50),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_emits_sequential_frames_each_interval() {
        // Arrange
        let sink = Arc::new(FrameSink::default());
        let events = dispatcher(&sink);
        let driver = Arc::new(CountingDriver::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        // Act
        let handle = FrameLoop::new(Duration::from_secs(1)).start(
            Arc::clone(&driver) as Arc<dyn ProtocolDriver>,
            events.publisher(),
            stop_rx,
            Box::new(|_| {}),
        );
        time::sleep(Duration::from_millis(3_500)).await;
        stop_tx.send_replace(true);
        let exit = handle.join().await;
        events.finish().await;

        // Assert
        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(*sink.sequences.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(driver.captures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_capture_when_stopped_before_first_tick() {
        let sink = Arc::new(FrameSink::default());
        let events = dispatcher(&sink);
        let driver = Arc::new(CountingDriver::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = FrameLoop::default().start(
            Arc::clone(&driver) as Arc<dyn ProtocolDriver>,
            events.publisher(),
            stop_rx,
            Box::new(|_| {}),
        );
        time::sleep(Duration::from_millis(10)).await;
        stop_tx.send_replace(true);
        handle.join().await;
        events.finish().await;

        assert_eq!(driver.captures.load(Ordering::SeqCst), 0);
        assert!(sink.sequences.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stop_sender_ends_loop() {
        let sink = Arc::new(FrameSink::default());
        let events = dispatcher(&sink);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = FrameLoop::default().start(
            Arc::new(CountingDriver::default()) as Arc<dyn ProtocolDriver>,
            events.publisher(),
            stop_rx,
            Box::new(|_| {}),
        );

        drop(stop_tx);

        assert_eq!(handle.join().await, LoopExit::Stopped);
        events.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_loop_and_invokes_handler() {
        // Arrange
        let sink = Arc::new(FrameSink::default());
        let events = dispatcher(&sink);
        let (fault_tx, fault_rx) = tokio::sync::oneshot::channel();
        let driver = Arc::new(CountingDriver {
            fault: Mutex::new(Some(fault_rx)),
            ..Default::default()
        });
        let (_stop_tx, stop_rx) = watch::channel(false);
        let reported = Arc::new(Mutex::new(None));
        let reported_clone = Arc::clone(&reported);

        let handle = FrameLoop::default().start(
            Arc::clone(&driver) as Arc<dyn ProtocolDriver>,
            events.publisher(),
            stop_rx,
            Box::new(move |err| {
                *reported_clone.lock().unwrap() = Some(err);
            }),
        );

        // Act – two frames, then the transport drops
        time::sleep(Duration::from_millis(2_500)).await;
        fault_tx
            .send(DriverError::TransportLost("reset by peer".into()))
            .unwrap();
        let exit = handle.join().await;
        events.finish().await;

        // Assert
        let expected = DriverError::TransportLost("reset by peer".into());
        assert_eq!(exit, LoopExit::Fault(expected.clone()));
        assert_eq!(*reported.lock().unwrap(), Some(expected));
        assert_eq!(*sink.sequences.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        assert_eq!(FrameLoop::new(Duration::ZERO).interval(), Duration::from_millis(1));
        assert_eq!(FrameLoop::default().interval(), DEFAULT_FRAME_INTERVAL);
    }
}
