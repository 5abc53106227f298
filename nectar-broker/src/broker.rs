use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use nectar_core::{err::broker::BrokerError, qos::QosLevel, v3::PublishPacket};
use tokio::{net::TcpListener, sync::RwLock};

use crate::{
    auth::{AcceptAll, Authenticator},
    config::BrokerConfig,
    connection,
    routing::SubscriptionTable,
    store::{RetainedMessage, Stores},
};

pub struct MqttBroker {
    config: BrokerConfig,
    routing: RwLock<SubscriptionTable>,
    stores: Stores,
    auth: Arc<dyn Authenticator>,
    // client id -> number of live connections using it.
    active_clients: Mutex<HashMap<String, usize>>,
    packet_ids: AtomicU64,
}

impl MqttBroker {
    /// Builds a broker with the in-memory stores and the accept-all
    /// credential check.
    pub fn new(config: BrokerConfig) -> Self {
        return Self::with_collaborators(config, Stores::in_memory(), Arc::new(AcceptAll));
    }

    pub fn with_collaborators(
        config: BrokerConfig,
        stores: Stores,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        return Self {
            routing: RwLock::new(SubscriptionTable::new(config.max_qos())),
            config,
            stores,
            auth,
            active_clients: Mutex::new(HashMap::new()),
            packet_ids: AtomicU64::new(0),
        };
    }

    /// Claims the client id for a live connection. Refused when a non-clean
    /// session would collide with a connection already using the id.
    pub fn register_client(&self, client_id: &str, clean_session: bool) -> bool {
        let mut active = self
            .active_clients
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        if active.contains_key(client_id) && !clean_session {
            return false;
        }

        *active.entry(client_id.to_string()).or_insert(0) += 1;
        return true;
    }

    pub fn release_client(&self, client_id: &str) {
        let mut active = self
            .active_clients
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        if let Some(count) = active.get_mut(client_id) {
            *count -= 1;
            if *count == 0 {
                active.remove(client_id);
            }
        }
    }

    pub fn routing(&self) -> &RwLock<SubscriptionTable> {
        return &self.routing;
    }

    pub fn stores(&self) -> &Stores {
        return &self.stores;
    }

    pub fn auth(&self) -> &dyn Authenticator {
        return self.auth.as_ref();
    }

    /// Binds the configured address and accepts connections until the
    /// process dies. A failed bind is fatal; a failed accept and every
    /// per-connection error are logged and do not take the broker down.
    pub async fn listen(self: Arc<Self>) -> Result<(), BrokerError> {
        let addr = self.config.addr();

        let listener = TcpListener::bind(&addr).await?;

        log::info!("Broker listening at: {addr}");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    log::info!("New connection attempt: {addr}");

                    let broker = Arc::clone(&self);

                    tokio::spawn(async move {
                        match connection::handle_client(&broker, stream).await {
                            Ok(()) => log::info!("Gracefully closed connection: {addr}"),
                            Err(err) => {
                                log::warn!("Error handling client: {err}. Closed connection: {addr}")
                            }
                        }
                    });
                }
                Err(err) => {
                    log::error!("Rejected TCP connection: {err}");
                }
            }
        }
    }

    /// Fans the packet out to every current subscriber of its topic, in
    /// first-subscribe order. Each delivery is re-flagged (dup cleared,
    /// retain cleared by the caller) and downgraded to the QoS granted to
    /// that subscriber. A dead subscriber never stalls the loop: its queue
    /// rejects the send, it is logged and dropped from the table.
    pub async fn publish(&self, packet: &PublishPacket) {
        let subscribers = self.routing.read().await.subscribers_of(packet.topic());

        let mut dead = Vec::new();

        for sub in subscribers {
            let mut out = packet.clone();
            out.set_dup(false);

            match out.qos().min(sub.qos) {
                QosLevel::AtMostOnce => out.set_qos_atmostonce(),
                QosLevel::AtLeastOnce => {
                    if let Some(id) = out.id() {
                        out.set_qos_atleastonce(id);
                    } else {
                        out.set_qos_atmostonce();
                    }
                }
                QosLevel::ExactlyOnce => {}
            }

            match out.encode() {
                Ok(buf) => {
                    if sub.handle.send(buf).is_err() {
                        log::warn!(
                            "Dropping subscriber {} from topic {}: its write queue is closed.",
                            sub.handle.client_id(),
                            packet.topic()
                        );
                        dead.push(sub.handle.id());
                    }
                }
                Err(err) => {
                    log::error!(
                        "Could not encode outbound PUBLISH for {}: {err}",
                        sub.handle.client_id()
                    );
                }
            }
        }

        if !dead.is_empty() {
            let mut routing = self.routing.write().await;
            for id in dead {
                routing.drop_connection(id);
            }
        }
    }

    /// Applies the retain side of a PUBLISH: a payload replaces the topic's
    /// retained message, an empty payload deletes it. Store failures in
    /// steady state are logged and the message still flows to current
    /// subscribers.
    pub fn store_retained(&self, packet: &PublishPacket) {
        if packet.payload().is_empty() {
            if let Err(err) = self.stores.retained.remove(packet.topic()) {
                log::error!("Could not clear the retained message on {}: {err}", packet.topic());
            }
        } else {
            let message = RetainedMessage {
                topic: packet.topic().to_string(),
                qos: packet.qos(),
                payload: packet.payload().clone(),
            };
            if let Err(err) = self.stores.retained.upsert(message) {
                log::error!("Could not retain the message on {}: {err}", packet.topic());
            }
        }
    }

    /// Publishes the stored will of a client that vanished without a
    /// DISCONNECT, exactly as if the client had published it, then forgets
    /// it. Called only on an ungraceful close.
    pub async fn publish_will(&self, client_id: &str) {
        match self.stores.wills.take(client_id) {
            Ok(Some(will)) => {
                log::info!("Publishing the will of {client_id} to {}", will.topic);

                let mut packet = PublishPacket::new(&will.topic, will.payload.clone());

                match will.qos {
                    QosLevel::AtMostOnce => {}
                    QosLevel::AtLeastOnce => packet.set_qos_atleastonce(self.next_packet_id()),
                    QosLevel::ExactlyOnce => packet.set_qos_exactlyonce(self.next_packet_id()),
                }

                if will.retain {
                    packet.set_retain(true);
                    self.store_retained(&packet);
                    packet.set_retain(false);
                }

                self.publish(&packet).await;
            }
            Ok(None) => {}
            Err(err) => {
                log::error!("Could not load the will of {client_id}: {err}");
            }
        }
    }

    /// Packet ids for broker-originated publishes. Zero is not a valid id.
    fn next_packet_id(&self) -> u16 {
        let n = self.packet_ids.fetch_add(1, Ordering::Relaxed);
        return (n % u16::MAX as u64) as u16 + 1;
    }
}
