//! Observable receiver signals
//!
//! Every externally visible state transition is published as a
//! [`ReceiverEvent`]. Events are edge-triggered: a value is sent only when
//! the underlying state actually changes, and always from the control
//! thread, in the order the transitions happened.

use std::path::PathBuf;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// The source exposed a pad and data is flowing (or stopped flowing).
    StreamingChanged(bool),
    /// The decoding branch went active (or was demolished).
    DecodingChanged(bool),
    /// The recording branch went active (or was demolished).
    RecordingChanged(bool),
    /// The decoder reported the encoded frame size.
    VideoSizeChanged { width: i32, height: i32 },
    /// A recording file path was accepted.
    VideoFileChanged(PathBuf),
    /// An image grab was requested (capture itself is reserved).
    ImageFileChanged(PathBuf),
    /// A fatal pipeline error occurred and the restart delay elapsed.
    RestartTimeout,
    /// The recording branch saw its first keyframe and zeroed timestamps.
    GotFirstRecordingKeyFrame,
}

/// Fan-out point for [`ReceiverEvent`]s.
///
/// Cheap to clone; subscribers that fall behind lose the oldest events
/// rather than blocking the control thread.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReceiverEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReceiverEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn emit(&self, event: ReceiverEvent) {
        log::debug!("event: {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(ReceiverEvent::StreamingChanged(true));
        bus.emit(ReceiverEvent::VideoSizeChanged {
            width: 1920,
            height: 1080,
        });

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                ReceiverEvent::StreamingChanged(true)
            );
            assert_eq!(
                rx.try_recv().unwrap(),
                ReceiverEvent::VideoSizeChanged {
                    width: 1920,
                    height: 1080
                }
            );
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        // Must not panic or error
        bus.emit(ReceiverEvent::RestartTimeout);
    }

    #[test]
    fn test_late_subscriber_sees_only_new_events() {
        let bus = EventBus::new();
        bus.emit(ReceiverEvent::StreamingChanged(true));

        let mut rx = bus.subscribe();
        bus.emit(ReceiverEvent::StreamingChanged(false));

        assert_eq!(
            rx.try_recv().unwrap(),
            ReceiverEvent::StreamingChanged(false)
        );
        assert!(rx.try_recv().is_err());
    }
}
