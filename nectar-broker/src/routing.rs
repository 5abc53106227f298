use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use nectar_core::qos::QosLevel;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The half of a connection the routing layer is allowed to touch: an id,
/// the client id, and the queue drained by that connection's writer task.
/// Enqueueing here is the only way to reach a peer's transport, which keeps
/// each stream single-writer.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: u64,
    client_id: String,
    outbound: UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    pub fn new(client_id: String) -> (Self, UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();

        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client_id,
            outbound,
        };

        return (handle, rx);
    }

    pub fn id(&self) -> u64 {
        return self.id;
    }

    pub fn client_id(&self) -> &str {
        return &self.client_id;
    }

    /// Queues encoded bytes for the writer task. Fails only once the
    /// connection is gone and its receiver has been dropped.
    pub fn send(&self, buf: Bytes) -> Result<(), SendError<Bytes>> {
        return self.outbound.send(buf);
    }
}

#[derive(Clone, Debug)]
pub struct Subscriber {
    pub handle: ConnectionHandle,
    pub qos: QosLevel,
}

/// Maps each topic to the connections subscribed to it, in first-subscribe
/// order. Matching is exact string equality; no wildcard expansion.
pub struct SubscriptionTable {
    topics: HashMap<String, Vec<Subscriber>>,
    max_qos: QosLevel,
}

impl SubscriptionTable {
    pub fn new(max_qos: QosLevel) -> Self {
        return Self {
            topics: HashMap::new(),
            max_qos,
        };
    }

    /// Registers the connection under the topic and returns the granted QoS,
    /// the requested level capped at the broker maximum. A connection
    /// appears at most once per topic; re-subscribing updates the granted
    /// QoS in place without disturbing the ordering.
    pub fn subscribe(
        &mut self,
        handle: &ConnectionHandle,
        topic: &str,
        requested: QosLevel,
    ) -> QosLevel {
        let granted = requested.min(self.max_qos);

        let subscribers = self.topics.entry(topic.to_string()).or_default();

        match subscribers
            .iter_mut()
            .find(|sub| sub.handle.id() == handle.id())
        {
            Some(existing) => {
                existing.qos = granted;
            }
            None => {
                subscribers.push(Subscriber {
                    handle: handle.clone(),
                    qos: granted,
                });
            }
        }

        return granted;
    }

    /// No-op when the connection never subscribed to the topic.
    pub fn unsubscribe(&mut self, connection_id: u64, topic: &str) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|sub| sub.handle.id() != connection_id);

            if subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Removes the connection from every topic it appears under.
    pub fn drop_connection(&mut self, connection_id: u64) {
        self.topics
            .retain(|_, subscribers| {
                subscribers.retain(|sub| sub.handle.id() != connection_id);
                return !subscribers.is_empty();
            });
    }

    /// Owned snapshot for fan-out, so no lock is held across writes.
    pub fn subscribers_of(&self, topic: &str) -> Vec<Subscriber> {
        match self.topics.get(topic) {
            Some(subscribers) => return subscribers.clone(),
            None => return Vec::new(),
        }
    }

    pub fn contains(&self, connection_id: u64, topic: &str) -> bool {
        match self.topics.get(topic) {
            Some(subscribers) => {
                return subscribers
                    .iter()
                    .any(|sub| sub.handle.id() == connection_id)
            }
            None => return false,
        }
    }
}
