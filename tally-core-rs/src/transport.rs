//! Publish/subscribe transport
//!
//! A transport delivers `(topic, payload)` pairs to the node through an event
//! channel and publishes fire-and-forget. Nothing is queued while
//! disconnected: publishes are dropped with a warning.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event delivered by a transport to its node
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection (re)established and subscriptions in place
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

/// Outbound side of a publish/subscribe connection
pub trait Transport: Send + 'static {
    /// Publish a payload. Dropped with a warning when not connected.
    fn publish(&self, topic: &str, payload: Vec<u8>);

    fn is_connected(&self) -> bool;
}

struct Subscriber {
    id: u64,
    topics: HashSet<String>,
    online: Arc<AtomicBool>,
    tx: mpsc::Sender<TransportEvent>,
}

/// In-process broker with exact-match topics.
///
/// Delivery is best effort: a subscriber whose event channel is full misses
/// the message, like a lossy network would.
#[derive(Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client subscribed to `topics`. The client starts online and
    /// receives `Connected` immediately.
    pub fn connect(&self, topics: Vec<String>) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let online = Arc::new(AtomicBool::new(true));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let _ = tx.try_send(TransportEvent::Connected);

        self.subscribers.write().push(Subscriber {
            id,
            topics: topics.into_iter().collect(),
            online: online.clone(),
            tx: tx.clone(),
        });

        let transport = MemoryTransport {
            id,
            bus: self.clone(),
            online,
            events: tx,
        };
        (transport, rx)
    }

    /// Number of attached clients
    pub fn client_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn deliver(&self, from: u64, topic: &str, payload: &[u8]) {
        let subscribers = self.subscribers.read();
        for sub in subscribers.iter() {
            if !sub.online.load(Ordering::Acquire) || !sub.topics.contains(topic) {
                continue;
            }
            let event = TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            if sub.tx.try_send(event).is_err() {
                debug!("Bus: client {} missed message on {} (from {})", sub.id, topic, from);
            }
        }
    }

    fn detach(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }
}

/// Client handle on a [`MemoryBus`]
pub struct MemoryTransport {
    id: u64,
    bus: MemoryBus,
    online: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryTransport {
    /// Simulate losing or regaining the connection
    pub fn set_online(&self, online: bool) {
        self.link().set_online(online);
    }

    /// Handle for toggling connectivity from outside the node
    pub fn link(&self) -> MemoryLink {
        MemoryLink {
            online: self.online.clone(),
            events: self.events.clone(),
        }
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        if !self.is_connected() {
            warn!("Bus: not connected, dropping publish to {}", topic);
            return;
        }
        self.bus.deliver(self.id, topic, &payload);
    }

    fn is_connected(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.bus.detach(self.id);
    }
}

/// Connectivity switch for a [`MemoryTransport`] owned by a running node
#[derive(Clone)]
pub struct MemoryLink {
    online: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryLink {
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::AcqRel);
        if was != online {
            let event = if online {
                TransportEvent::Connected
            } else {
                TransportEvent::Disconnected
            };
            let _ = self.events.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_bus_routes_by_topic() {
        let bus = MemoryBus::new();
        let (a, mut a_rx) = bus.connect(topics(&["x"]));
        let (_b, mut b_rx) = bus.connect(topics(&["y"]));

        assert_eq!(a_rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Connected));

        a.publish("y", b"hello".to_vec());
        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::Message {
                topic: "y".to_string(),
                payload: b"hello".to_vec(),
            })
        );
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_drops_both_directions() {
        let bus = MemoryBus::new();
        let (a, mut a_rx) = bus.connect(topics(&["x"]));
        let (b, mut b_rx) = bus.connect(topics(&["x"]));
        a_rx.recv().await;
        b_rx.recv().await;

        b.set_online(false);
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Disconnected));

        a.publish("x", b"1".to_vec());
        b.publish("x", b"2".to_vec());
        // a receives its own publication, b gets nothing
        assert!(matches!(a_rx.recv().await, Some(TransportEvent::Message { .. })));
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());

        b.link().set_online(true);
        assert_eq!(b_rx.recv().await, Some(TransportEvent::Connected));
    }

    #[test]
    fn test_drop_detaches() {
        let bus = MemoryBus::new();
        let (a, _rx) = bus.connect(topics(&["x"]));
        assert_eq!(bus.client_count(), 1);
        drop(a);
        assert_eq!(bus.client_count(), 0);
    }
}
