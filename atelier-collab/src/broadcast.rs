//! Broadcast Router: fan-out of room events with backpressure.
//!
//! Uses one tokio broadcast channel per room. Every member holds an
//! independent receiver buffering up to `capacity` events; a member that
//! falls further behind sees `Lagged` and resynchronises with
//! `requestSync`.
//!
//! Events are encoded once on send. Each event says whether the sender
//! should see it; receivers filter with [`RoomEvent::visible_to`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    /// Events a receiver skipped because it lagged.
    pub messages_dropped: u64,
    pub active_receivers: usize,
}

/// One event delivered to a room.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// Session that must not receive this event.
    pub exclude: Option<Uuid>,
    pub message: ServerMessage,
    /// Pre-encoded JSON text frame.
    pub encoded: Arc<str>,
}

impl RoomEvent {
    /// Event for every member, sender included.
    pub fn to_all(message: ServerMessage) -> Result<Self, ProtocolError> {
        Self::build(message, None)
    }

    /// Event for every member except `sender`.
    pub fn to_others(sender: Uuid, message: ServerMessage) -> Result<Self, ProtocolError> {
        Self::build(message, Some(sender))
    }

    fn build(message: ServerMessage, exclude: Option<Uuid>) -> Result<Self, ProtocolError> {
        let encoded: Arc<str> = message.encode()?.into();
        Ok(Self {
            exclude,
            message,
            encoded,
        })
    }

    pub fn visible_to(&self, session_id: Uuid) -> bool {
        self.exclude != Some(session_id)
    }
}

/// Lock-free broadcast stats.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Broadcast channel of one room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RoomEvent>>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is how many events each receiver may buffer before it
    /// starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: AtomicBroadcastStats {
                messages_sent: AtomicU64::new(0),
                messages_dropped: AtomicU64::new(0),
            },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RoomEvent>> {
        self.sender.subscribe()
    }

    /// Deliver an event. Returns the number of receivers it reached
    /// (zero when the room has no live receivers).
    pub fn send(&self, event: RoomEvent) -> usize {
        let count = self.sender.send(Arc::new(event)).unwrap_or(0);
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record events skipped by a lagging receiver.
    pub fn note_lagged(&self, skipped: u64) {
        self.stats.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_receivers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn joined(session_id: Uuid) -> ServerMessage {
        ServerMessage::UserJoined {
            subject_id: "alice".into(),
            session_id,
            page: None,
            color: "#ffffff".into(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_receivers() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.subscribe();
        let mut rx2 = group.subscribe();

        let count = group.send(RoomEvent::to_all(joined(Uuid::new_v4())).unwrap());
        assert_eq!(count, 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
        assert!(e1.encoded.contains("\"type\":\"userJoined\""));
    }

    #[tokio::test]
    async fn test_exclusion_filter() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let event = RoomEvent::to_others(alice, joined(alice)).unwrap();
        assert!(!event.visible_to(alice));
        assert!(event.visible_to(bob));

        let event = RoomEvent::to_all(joined(alice)).unwrap();
        assert!(event.visible_to(alice));
    }

    #[tokio::test]
    async fn test_send_without_receivers() {
        let group = BroadcastGroup::new(4);
        assert_eq!(group.send(RoomEvent::to_all(joined(Uuid::new_v4())).unwrap()), 0);
        assert_eq!(group.stats().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_lagging_receiver() {
        let group = BroadcastGroup::new(2);
        let mut rx = group.subscribe();
        for _ in 0..5 {
            group.send(RoomEvent::to_all(joined(Uuid::new_v4())).unwrap());
        }
        match rx.recv().await {
            Err(RecvError::Lagged(n)) => {
                group.note_lagged(n);
                assert_eq!(n, 3);
            }
            other => panic!("expected lag, got {other:?}"),
        }
        let stats = group.stats();
        assert_eq!(stats.messages_sent, 5);
        assert_eq!(stats.messages_dropped, 3);
        assert_eq!(stats.active_receivers, 1);
        assert_eq!(group.capacity(), 2);
    }
}
