//! Observer bus for client events.
//!
//! Subscribers receive every event emitted after they subscribe, in emission
//! order. Dropping a [`Subscription`] unsubscribes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;

use super::conversation::{ConversationItem, ItemDelta};
use super::messages::ApiError;

/// Origin of a logged protocol frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Sent by this client
    Client,
    /// Received from the server
    Server,
    /// Generated locally (e.g. socket closed)
    System,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Client => "client",
            EventSource::Server => "server",
            EventSource::System => "system",
        }
    }
}

/// Event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Raw frame in either direction (`realtime.event`)
    Protocol {
        time: OffsetDateTime,
        source: EventSource,
        event: Value,
    },
    /// An item changed (`conversation.updated`)
    ConversationUpdated {
        item: ConversationItem,
        delta: Option<ItemDelta>,
    },
    /// A new item was created (`conversation.item.appended`)
    ItemAppended { item: ConversationItem },
    /// An item reached `completed` (`conversation.item.completed`)
    ItemCompleted { item: ConversationItem },
    /// The user started speaking over the assistant (`conversation.interrupted`)
    Interrupted,
    /// The server reported an error (`realtime.error`)
    Error { error: ApiError },
}

impl RealtimeEvent {
    pub(crate) fn protocol(source: EventSource, event: Value) -> Self {
        RealtimeEvent::Protocol {
            time: OffsetDateTime::now_utc(),
            source,
            event,
        }
    }

    /// Observer channel name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::Protocol { .. } => "realtime.event",
            RealtimeEvent::ConversationUpdated { .. } => "conversation.updated",
            RealtimeEvent::ItemAppended { .. } => "conversation.item.appended",
            RealtimeEvent::ItemCompleted { .. } => "conversation.item.completed",
            RealtimeEvent::Interrupted => "conversation.interrupted",
            RealtimeEvent::Error { .. } => "realtime.error",
        }
    }

    /// RFC 3339 timestamp of a protocol event.
    pub fn timestamp(&self) -> Option<String> {
        match self {
            RealtimeEvent::Protocol { time, .. } => time.format(&Rfc3339).ok(),
            _ => None,
        }
    }
}

type Subscribers = Mutex<Vec<(u64, mpsc::UnboundedSender<RealtimeEvent>)>>;

/// Fan-out of [`RealtimeEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Subscribers,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a subscriber.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((id, tx));
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(self),
        }
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: RealtimeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        assert_eq!(RealtimeEvent::Interrupted.name(), "conversation.interrupted");
        let event = RealtimeEvent::protocol(EventSource::Client, json!({"type": "response.create"}));
        assert_eq!(event.name(), "realtime.event");
        assert!(event.timestamp().is_some());
        assert_eq!(EventSource::Server.as_str(), "server");
    }

    #[tokio::test]
    async fn test_delivery_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        for i in 0..3 {
            bus.emit(RealtimeEvent::protocol(EventSource::Server, json!({"seq": i})));
        }

        for i in 0..3 {
            match sub.recv().await {
                Some(RealtimeEvent::Protocol { event, source, .. }) => {
                    assert_eq!(source, EventSource::Server);
                    assert_eq!(event["seq"], i);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(RealtimeEvent::Interrupted);
        assert!(matches!(a.try_recv(), Some(RealtimeEvent::Interrupted)));
        assert!(matches!(b.try_recv(), Some(RealtimeEvent::Interrupted)));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let other = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        other.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        // Emitting with nobody listening is fine
        bus.emit(RealtimeEvent::Interrupted);
    }

    #[test]
    fn test_recv_wakes_on_emit() {
        use tokio_test::{assert_pending, assert_ready, task};

        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut recv = task::spawn(sub.recv());
        assert_pending!(recv.poll());

        bus.emit(RealtimeEvent::Interrupted);
        assert!(recv.is_woken());
        assert!(matches!(
            assert_ready!(recv.poll()),
            Some(RealtimeEvent::Interrupted)
        ));
    }

    #[test]
    fn test_recv_ends_when_bus_dropped() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(tokio_test::block_on(sub.recv()).is_none());
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.emit(RealtimeEvent::Interrupted);
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }
}
