//! Event bus (spec.md component C).
//!
//! Each subscriber gets its own bounded `mpsc` channel. Publishing tries a
//! non-blocking send per subscriber; a full channel drops the event for
//! *that* subscriber only and the drop is counted, never awaited and never
//! propagated to the other subscribers. A single `tokio::sync::broadcast`
//! channel would instead force every subscriber to skip-lag together when
//! any one of them falls behind, which spec.md 4.3 rules out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::event::ProgressEvent;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<ProgressEvent>,
    dropped: AtomicU64,
}

pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber and returns its id plus receiver half.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            sender: tx,
            dropped: AtomicU64::new(0),
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Publishes to every live subscriber, dropping for any whose channel is
    /// momentarily full instead of blocking the publisher.
    pub fn publish(&self, event: ProgressEvent) {
        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(event.clone()) {
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscriber = %sub.id, "event bus dropped event for lagging subscriber");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn dropped_count(&self, id: Uuid) -> u64 {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> ProgressEvent {
        ProgressEvent::new("tts", "proj-1", "task-1", "progress")
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let (_id1, mut rx1) = bus.subscribe();
        let (_id2, mut rx2) = bus.subscribe();
        bus.publish(sample_event());
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_channel_drops_only_for_that_subscriber() {
        let bus = EventBus::new();
        let (slow_id, mut slow_rx) = bus.subscribe();
        let (_fast_id, mut fast_rx) = bus.subscribe();

        for _ in 0..SUBSCRIBER_CHANNEL_CAPACITY + 5 {
            bus.publish(sample_event());
        }
        assert!(bus.dropped_count(slow_id) > 0);

        // fast subscriber drains concurrently and should have received
        // at least the channel's capacity worth of events without loss
        // relative to its own buffer.
        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received > 0);
        drop(slow_rx.try_recv());
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscriber() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
