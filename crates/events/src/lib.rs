//! In-process publish/subscribe (C2). Mirrors the teacher's
//! `BackendEvent` broadcast channel shape: a synchronous, in-process bus
//! with one producer-facing `publish` and many `subscribe()`-returned
//! receivers, no persistence or cross-process delivery.

mod encode;
mod outbound;

pub use encode::EncodeEvent;
pub use outbound::{OutboundFrame, OutboundFrameType};

use tokio::sync::broadcast;

/// Default channel capacity; lagging subscribers drop the oldest frames
/// rather than block the publisher (broadcast semantics).
const CHANNEL_CAPACITY: usize = 256;

/// The sole subscriber of `EncodeEvent` is the memory-chunker dispatch
/// (`cortex-workers`), which turns each event into a chunker job.
#[derive(Clone)]
pub struct EncodeEventBus {
    tx: broadcast::Sender<EncodeEvent>,
}

impl Default for EncodeEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EncodeEvent> {
        self.tx.subscribe()
    }

    /// Publishes synchronously; a send with no subscribers is not an
    /// error — the event is simply dropped, matching the teacher's
    /// in-process bus which never guarantees delivery across restarts.
    pub fn publish(&self, event: EncodeEvent) {
        let _ = self.tx.send(event);
    }
}

/// Outbound channel to background consumers (drift-stream, notification
/// dispatch, web push) — spec §6's "Outbound contract to background
/// channels".
#[derive(Clone)]
pub struct OutboundBus {
    tx: broadcast::Sender<OutboundFrame>,
}

impl Default for OutboundBus {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundFrame> {
        self.tx.subscribe()
    }

    pub fn publish(&self, frame: OutboundFrame) {
        let _ = self.tx.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_encode_event_reaches_subscriber() {
        let bus = EncodeEventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EncodeEvent::user_half(
            "general",
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            "hello",
        ));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "general");
        assert!(received.response_message.is_empty());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EncodeEventBus::new();
        bus.publish(EncodeEvent::user_half(
            "general",
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            "hello",
        ));
    }
}
