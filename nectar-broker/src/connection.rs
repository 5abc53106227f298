use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use nectar_core::{
    err::broker::{BrokerError, ErrorKind},
    io::read_packet,
    qos::{QosLevel, SubAckReturnCode},
    v3::{
        ConnAckPacket, ConnectPacket, MqttPacket, PingRespPacket, PubAckPacket, PubCompPacket,
        PubRecPacket, PublishPacket, SubAckPacket, UnsubAckPacket, PROTOCOL_LEVEL,
    },
};
use tokio::{
    io::{self, AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::{mpsc::UnboundedReceiver, oneshot},
    time::timeout,
};

use crate::{
    broker::MqttBroker,
    routing::ConnectionHandle,
    store::{RetainedMessage, Session, Will},
};

/// How long a freshly accepted transport may sit silent before its first
/// packet must have arrived.
const CONNECT_GRACE: Duration = Duration::from_secs(30);

static ANONYMOUS_IDS: AtomicU64 = AtomicU64::new(1);

/// Drives one accepted transport through its whole life: CONNECT handling,
/// the steady-state dispatch loop, and teardown. The actor owns the read
/// half; the write half is owned by a single writer task draining the
/// connection's outbound queue, so every write on the stream is issued by
/// exactly one task, in queue order.
pub async fn handle_client<S>(broker: &Arc<MqttBroker>, stream: S) -> Result<(), BrokerError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = io::split(stream);

    let packet = match timeout(CONNECT_GRACE, read_packet::<_, BrokerError>(&mut reader)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(BrokerError::new(
                ErrorKind::Timeout,
                String::from("No packet arrived within the connect grace period."),
            ));
        }
    };

    let connect = match packet {
        MqttPacket::Connect(connect) => connect,
        other => {
            return Err(BrokerError::new(
                ErrorKind::ProtocolError,
                format!("The first packet on a connection must be CONNECT, received {other:?}."),
            ));
        }
    };

    let client_id = match vet_connect(broker, &connect) {
        Ok(client_id) => client_id,
        Err(connack) => {
            let code = connack.return_code();
            writer.write_all(&connack.encode()).await?;
            let _ = writer.shutdown().await;
            return Err(BrokerError::new(
                ErrorKind::ConnectError(code),
                format!("Rejected connection: {code}."),
            ));
        }
    };

    let (handle, outbound) = ConnectionHandle::new(client_id.clone());
    let writer_task = tokio::spawn(drain_outbound(outbound, writer));

    // The CONNACK must be the first packet the broker writes on the stream;
    // it is the first entry in the queue the writer task drains.
    enqueue(&handle, ConnAckPacket::accepted().encode())?;

    log::info!("Accepted connection for client {client_id}");

    let result = run_session(broker, &mut reader, &handle, &connect).await;

    // No orphan subscriptions may survive the actor.
    broker.routing().write().await.drop_connection(handle.id());

    match &result {
        Ok(()) => {
            // a clean DISCONNECT discards the will without publishing it.
            if let Err(err) = broker.stores().wills.take(&client_id) {
                log::error!("Could not discard the will of {client_id}: {err}");
            }
        }
        Err(err) => {
            if err.is_disconnect() {
                log::info!("Client {client_id} vanished without a DISCONNECT");
            }
            broker.publish_will(&client_id).await;
        }
    }

    broker.release_client(&client_id);

    // dropping the handle closes the queue; the writer drains what is left
    // and shuts the transport down.
    drop(handle);
    let _ = writer_task.await;

    return result;
}

/// Validates a CONNECT packet and persists its session state. Returns the
/// effective client id, or the CONNACK to reject the connection with.
fn vet_connect(broker: &Arc<MqttBroker>, connect: &ConnectPacket) -> Result<String, ConnAckPacket> {
    if connect.level() != PROTOCOL_LEVEL {
        return Err(ConnAckPacket::bad_protocol_version());
    }

    let client_id = if connect.client_id().is_empty() {
        // a zero byte client id is only allowed together with a clean
        // session; the broker then assigns one [MQTT-3.1.3-6, -3.1.3-8].
        if !connect.clean_session() {
            return Err(ConnAckPacket::invalid_identifier());
        }
        format!("anonymous-{}", ANONYMOUS_IDS.fetch_add(1, Ordering::Relaxed))
    } else {
        connect.client_id().to_string()
    };

    match broker.auth().authenticate(connect.password()) {
        Ok(true) => {}
        Ok(false) => return Err(ConnAckPacket::not_auth()),
        Err(err) => {
            log::warn!("Credential check failed for {client_id}: {err}");
            return Err(ConnAckPacket::bad_auth());
        }
    }

    if !broker.register_client(&client_id, connect.clean_session()) {
        return Err(ConnAckPacket::invalid_identifier());
    }

    let session = Session::new(client_id.clone(), connect.username().map(str::to_string));
    if let Err(err) = broker.stores().sessions.create(session) {
        log::error!("Could not persist the session for {client_id}: {err}");
        broker.release_client(&client_id);
        return Err(ConnAckPacket::service_unavailable());
    }

    if let Some(will) = &connect.will {
        let row = Will {
            client_id: client_id.clone(),
            topic: will.topic.clone(),
            qos: will.qos,
            payload: will.payload.clone(),
            retain: will.retain,
        };
        if let Err(err) = broker.stores().wills.create(row) {
            log::error!("Could not persist the will for {client_id}: {err}");
            broker.release_client(&client_id);
            return Err(ConnAckPacket::service_unavailable());
        }
    }

    return Ok(client_id);
}

struct SessionState {
    /// One-shot signals for QoS 2 exchanges awaiting their PUBREL, keyed by
    /// packet id. Dropped wholesale when the session ends, which resolves
    /// every waiter task.
    pending_rel: HashMap<u16, oneshot::Sender<u16>>,
    /// Ids for publishes the broker originates on this connection.
    next_packet_id: u16,
}

impl SessionState {
    fn new() -> Self {
        return Self {
            pending_rel: HashMap::new(),
            next_packet_id: 0,
        };
    }

    fn next_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        return self.next_packet_id;
    }
}

/// The steady-state loop: read one packet, dispatch, repeat, under the
/// inactivity watchdog. Returns Ok on a clean DISCONNECT; every other exit
/// is an error and the caller publishes the will.
async fn run_session<R>(
    broker: &Arc<MqttBroker>,
    reader: &mut R,
    handle: &ConnectionHandle,
    connect: &ConnectPacket,
) -> Result<(), BrokerError>
where
    R: AsyncRead + Unpin,
{
    // The Server must disconnect a Client silent for one and a half times
    // its keep alive interval. Zero turns the watchdog off.
    let watchdog = match connect.keep_alive {
        0 => None,
        secs => Some(Duration::from_millis(secs as u64 * 1500)),
    };

    let mut state = SessionState::new();

    loop {
        let packet = match watchdog {
            Some(window) => match timeout(window, read_packet::<_, BrokerError>(reader)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(BrokerError::new(
                        ErrorKind::Timeout,
                        format!(
                            "No packet within 1.5x the keep alive interval of {}s.",
                            connect.keep_alive
                        ),
                    ));
                }
            },
            None => read_packet::<_, BrokerError>(reader).await?,
        };

        if handle_packet(broker, handle, &mut state, packet).await? {
            return Ok(());
        }
    }
}

/// Dispatches one inbound packet. Returns Ok(true) on a clean DISCONNECT.
async fn handle_packet(
    broker: &Arc<MqttBroker>,
    handle: &ConnectionHandle,
    state: &mut SessionState,
    packet: MqttPacket,
) -> Result<bool, BrokerError> {
    match packet {
        MqttPacket::Publish(mut packet) => {
            packet.set_dup(false);

            // The retain flag only means something between this client and
            // the broker; it is cleared before the fan-out.
            if packet.retain() {
                broker.store_retained(&packet);
                packet.set_retain(false);
            }

            match packet.qos() {
                QosLevel::AtMostOnce => {
                    broker.publish(&packet).await;
                }
                QosLevel::AtLeastOnce => {
                    let id = require_packet_id(&packet)?;
                    broker.publish(&packet).await;
                    enqueue(handle, PubAckPacket::new(id).encode())?;
                }
                QosLevel::ExactlyOnce => {
                    let id = require_packet_id(&packet)?;

                    if state.pending_rel.contains_key(&id) {
                        return Err(BrokerError::new(
                            ErrorKind::ProtocolError,
                            format!(
                                "Packet id {id} reused while its exactly-once exchange is still in flight."
                            ),
                        ));
                    }

                    broker.publish(&packet).await;
                    enqueue(handle, PubRecPacket::new(id).encode())?;

                    let (signal, release) = oneshot::channel();
                    state.pending_rel.insert(id, signal);

                    let complete_handle = handle.clone();
                    tokio::spawn(async move {
                        // resolved by the PUBREL handler; an Err means the
                        // session ended first and the ack is moot.
                        if let Ok(id) = release.await {
                            let _ = complete_handle.send(PubCompPacket::new(id).encode());
                        }
                    });
                }
            }
        }
        MqttPacket::PubRel(packet) => {
            match state.pending_rel.remove(&packet.id()) {
                Some(signal) => {
                    let _ = signal.send(packet.id());
                }
                None => {
                    // no exchange in flight for this id; answer anyway.
                    enqueue(handle, PubCompPacket::new(packet.id()).encode())?;
                }
            }
        }
        MqttPacket::Subscribe(packet) => {
            if packet.topics().is_empty() {
                return Err(BrokerError::new(
                    ErrorKind::ProtocolError,
                    String::from("Received a SUBSCRIBE packet with no topics."),
                ));
            }

            let mut codes = Vec::with_capacity(packet.topics().len());
            {
                let mut routing = broker.routing().write().await;
                for request in packet.topics() {
                    let granted = routing.subscribe(handle, &request.topic, request.qos);
                    codes.push(SubAckReturnCode::Granted(granted));
                }
            }

            // retained messages reach the new subscriber before the SUBACK.
            for (request, code) in packet.topics().iter().zip(&codes) {
                if let SubAckReturnCode::Granted(granted) = code {
                    match broker.stores().retained.get(&request.topic) {
                        Ok(Some(message)) => {
                            deliver_retained(handle, state, message, *granted)?;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            log::error!(
                                "Could not look up the retained message on {}: {err}",
                                request.topic
                            );
                        }
                    }
                }
            }

            enqueue(handle, SubAckPacket::new(packet.id(), codes).encode()?)?;
        }
        MqttPacket::Unsubscribe(packet) => {
            {
                let mut routing = broker.routing().write().await;
                for topic in packet.topics() {
                    routing.unsubscribe(handle.id(), topic);
                }
            }
            enqueue(handle, UnsubAckPacket::new(packet.id()).encode())?;
        }
        MqttPacket::PingReq(_) => {
            enqueue(handle, PingRespPacket::new().encode())?;
        }
        MqttPacket::Disconnect(_) => {
            return Ok(true);
        }
        MqttPacket::PubAck(packet) => {
            // acks for broker-originated deliveries are not tracked.
            log::debug!("Ignoring PUBACK {} from {}", packet.id(), handle.client_id());
        }
        MqttPacket::PubRec(packet) => {
            log::debug!("Ignoring PUBREC {} from {}", packet.id(), handle.client_id());
        }
        MqttPacket::PubComp(packet) => {
            log::debug!("Ignoring PUBCOMP {} from {}", packet.id(), handle.client_id());
        }
        other => {
            return Err(BrokerError::new(
                ErrorKind::ProtocolError,
                format!("Received a packet the client must not send: {other:?}."),
            ));
        }
    }

    return Ok(false);
}

fn require_packet_id(packet: &PublishPacket) -> Result<u16, BrokerError> {
    match packet.id() {
        Some(id) => return Ok(id),
        None => {
            return Err(BrokerError::new(
                ErrorKind::ProtocolError,
                String::from("PUBLISH packet above QoS 0 carried no packet id."),
            ))
        }
    }
}

/// Sends a topic's retained message to a fresh subscriber, retain flag set,
/// at the lower of the stored QoS and the granted QoS.
fn deliver_retained(
    handle: &ConnectionHandle,
    state: &mut SessionState,
    message: RetainedMessage,
    granted: QosLevel,
) -> Result<(), BrokerError> {
    let mut packet = PublishPacket::new(&message.topic, message.payload.clone());
    packet.set_retain(true);

    match message.qos.min(granted) {
        QosLevel::AtMostOnce => {}
        QosLevel::AtLeastOnce => packet.set_qos_atleastonce(state.next_packet_id()),
        QosLevel::ExactlyOnce => packet.set_qos_exactlyonce(state.next_packet_id()),
    }

    return enqueue(handle, packet.encode()?);
}

fn enqueue(handle: &ConnectionHandle, buf: Bytes) -> Result<(), BrokerError> {
    if handle.send(buf).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "The connection write queue is closed.",
        )
        .into());
    }
    return Ok(());
}

/// The single writer: drains the outbound queue onto the write half until
/// every sender is gone, then shuts the transport down.
async fn drain_outbound<W>(mut outbound: UnboundedReceiver<Bytes>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(buf) = outbound.recv().await {
        if let Err(err) = writer.write_all(&buf).await {
            log::warn!("Connection write failed: {err}");
            break;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod session {
    use std::sync::Arc;

    use bytes::Bytes;
    use nectar_core::{
        qos::QosLevel,
        v3::{ConnectPacket, Will},
    };
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::handle_client;
    use crate::{broker::MqttBroker, config::BrokerConfig};

    // CONNECT, protocol "MQTT" level 4, clean session, keep alive 60s,
    // zero byte client id.
    const CONNECT: &[u8] = &[
        0x10, 0x0C, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x00,
    ];

    const CONNACK_ACCEPTED: &[u8] = &[0x20, 0x02, 0x01, 0x00];

    // PUBLISH topic "hello" payload "world", QoS 0.
    const PUBLISH_HELLO_WORLD: &[u8] = &[
        0x30, 0x0C, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o', b'w', b'o', b'r', b'l', b'd',
    ];

    // SUBSCRIBE pid 1, topic "hello", requested QoS 0.
    const SUBSCRIBE_HELLO: &[u8] = &[
        0x82, 0x0A, 0x00, 0x01, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o', 0x00,
    ];

    const SUBACK_PID1_QOS0: &[u8] = &[0x90, 0x03, 0x00, 0x01, 0x00];

    fn test_broker() -> Arc<MqttBroker> {
        return Arc::new(MqttBroker::new(BrokerConfig::default()));
    }

    fn open_connection(broker: &Arc<MqttBroker>) -> DuplexStream {
        let (client, server) = duplex(4096);
        let broker = Arc::clone(broker);
        tokio::spawn(async move {
            let _ = handle_client(&broker, server).await;
        });
        return client;
    }

    /// Reads exactly one framed packet off the client side of the stream.
    async fn read_frame(stream: &mut DuplexStream) -> Vec<u8> {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.expect("read type byte");
        let mut frame = vec![byte[0]];

        let mut rest = 0usize;
        let mut mult = 1usize;
        loop {
            stream.read_exact(&mut byte).await.expect("read length byte");
            frame.push(byte[0]);
            rest += (byte[0] & 127) as usize * mult;
            mult *= 128;
            if byte[0] & 128 == 0 {
                break;
            }
        }

        let mut body = vec![0u8; rest];
        stream.read_exact(&mut body).await.expect("read body");
        frame.extend_from_slice(&body);
        return frame;
    }

    async fn expect_eof(stream: &mut DuplexStream) {
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => return,
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    }

    async fn connect(broker: &Arc<MqttBroker>) -> DuplexStream {
        let mut client = open_connection(broker);
        client.write_all(CONNECT).await.unwrap();
        assert_eq!(read_frame(&mut client).await, CONNACK_ACCEPTED);
        return client;
    }

    async fn connect_as(broker: &Arc<MqttBroker>, packet: &ConnectPacket) -> DuplexStream {
        let mut client = open_connection(broker);
        client.write_all(&packet.encode().unwrap()).await.unwrap();
        assert_eq!(read_frame(&mut client).await, CONNACK_ACCEPTED);
        return client;
    }

    #[tokio::test]
    async fn connect_handshake() {
        let broker = test_broker();
        let mut client = open_connection(&broker);

        client.write_all(CONNECT).await.unwrap();

        assert_eq!(read_frame(&mut client).await, CONNACK_ACCEPTED);
    }

    #[tokio::test]
    async fn first_packet_must_be_connect() {
        let broker = test_broker();
        let mut client = open_connection(&broker);

        // a PINGREQ before CONNECT closes the transport with no reply.
        client.write_all(&[0xC0, 0x00]).await.unwrap();

        expect_eof(&mut client).await;
    }

    #[tokio::test]
    async fn unsupported_protocol_level_is_rejected() {
        let broker = test_broker();
        let mut client = open_connection(&broker);

        let mut connect = CONNECT.to_vec();
        connect[8] = 0x05;
        client.write_all(&connect).await.unwrap();

        assert_eq!(read_frame(&mut client).await, &[0x20, 0x02, 0x00, 0x01]);
        expect_eof(&mut client).await;
    }

    #[tokio::test]
    async fn empty_client_id_without_clean_session_is_rejected() {
        let broker = test_broker();
        let mut client = open_connection(&broker);

        let mut connect = CONNECT.to_vec();
        connect[9] = 0x00;
        client.write_all(&connect).await.unwrap();

        assert_eq!(read_frame(&mut client).await, &[0x20, 0x02, 0x00, 0x02]);
        expect_eof(&mut client).await;
    }

    #[tokio::test]
    async fn duplicate_client_id_without_clean_session_is_rejected() {
        let broker = test_broker();

        let packet = ConnectPacket::new(false, 60, "sensor-1".to_string(), None, None, None);
        let _first = connect_as(&broker, &packet).await;

        let mut second = open_connection(&broker);
        second.write_all(&packet.encode().unwrap()).await.unwrap();

        assert_eq!(read_frame(&mut second).await, &[0x20, 0x02, 0x00, 0x02]);
        expect_eof(&mut second).await;
    }

    #[tokio::test]
    async fn ping_pong() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        client.write_all(&[0xC0, 0x00]).await.unwrap();

        assert_eq!(read_frame(&mut client).await, &[0xD0, 0x00]);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_quiet() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        client.write_all(PUBLISH_HELLO_WORLD).await.unwrap();
        client.write_all(&[0xC0, 0x00]).await.unwrap();

        // nothing precedes the ping response: the publish produced no
        // writes and did not close the connection.
        assert_eq!(read_frame(&mut client).await, &[0xD0, 0x00]);
    }

    #[tokio::test]
    async fn subscribe_then_receive() {
        let broker = test_broker();

        let mut subscriber = connect(&broker).await;
        subscriber.write_all(SUBSCRIBE_HELLO).await.unwrap();
        assert_eq!(read_frame(&mut subscriber).await, SUBACK_PID1_QOS0);

        let mut publisher = connect(&broker).await;
        publisher.write_all(PUBLISH_HELLO_WORLD).await.unwrap();

        assert_eq!(read_frame(&mut subscriber).await, PUBLISH_HELLO_WORLD);

        // exactly once: the next frame on the subscriber is a ping reply,
        // not a second copy.
        subscriber.write_all(&[0xC0, 0x00]).await.unwrap();
        assert_eq!(read_frame(&mut subscriber).await, &[0xD0, 0x00]);
    }

    #[tokio::test]
    async fn fanout_reaches_every_subscriber() {
        let broker = test_broker();

        let mut first = connect(&broker).await;
        first.write_all(SUBSCRIBE_HELLO).await.unwrap();
        assert_eq!(read_frame(&mut first).await, SUBACK_PID1_QOS0);

        let mut second = connect(&broker).await;
        second.write_all(SUBSCRIBE_HELLO).await.unwrap();
        assert_eq!(read_frame(&mut second).await, SUBACK_PID1_QOS0);

        let mut publisher = connect(&broker).await;
        publisher.write_all(PUBLISH_HELLO_WORLD).await.unwrap();

        assert_eq!(read_frame(&mut first).await, PUBLISH_HELLO_WORLD);
        assert_eq!(read_frame(&mut second).await, PUBLISH_HELLO_WORLD);

        // the publisher is not subscribed and receives nothing back.
        publisher.write_all(&[0xC0, 0x00]).await.unwrap();
        assert_eq!(read_frame(&mut publisher).await, &[0xD0, 0x00]);
    }

    #[tokio::test]
    async fn qos1_publish_is_acknowledged() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        // PUBLISH QoS 1, pid 0x1234, topic "t", payload "x".
        client
            .write_all(&[0x32, 0x06, 0x00, 0x01, b't', 0x12, 0x34, b'x'])
            .await
            .unwrap();

        assert_eq!(read_frame(&mut client).await, &[0x40, 0x02, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn qos1_delivery_downgrades_to_granted_qos() {
        let broker = test_broker();

        let mut subscriber = connect(&broker).await;
        subscriber.write_all(SUBSCRIBE_HELLO).await.unwrap();
        assert_eq!(read_frame(&mut subscriber).await, SUBACK_PID1_QOS0);

        let mut publisher = connect(&broker).await;
        // PUBLISH QoS 1, pid 0x1234, topic "hello", payload "world".
        publisher
            .write_all(&[
                0x32, 0x0E, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o', 0x12, 0x34, b'w', b'o',
                b'r', b'l', b'd',
            ])
            .await
            .unwrap();

        assert_eq!(read_frame(&mut publisher).await, &[0x40, 0x02, 0x12, 0x34]);

        // the subscriber was granted QoS 0, so the delivery drops the
        // packet id and the QoS bits.
        assert_eq!(read_frame(&mut subscriber).await, PUBLISH_HELLO_WORLD);
    }

    #[tokio::test]
    async fn qos2_exchange() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        // PUBLISH QoS 2, pid 5, topic "t", payload "x".
        client
            .write_all(&[0x34, 0x06, 0x00, 0x01, b't', 0x00, 0x05, b'x'])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut client).await, &[0x50, 0x02, 0x00, 0x05]);

        client.write_all(&[0x62, 0x02, 0x00, 0x05]).await.unwrap();
        assert_eq!(read_frame(&mut client).await, &[0x70, 0x02, 0x00, 0x05]);
    }

    #[tokio::test]
    async fn pubrel_without_an_exchange_is_still_answered() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        client.write_all(&[0x62, 0x02, 0x00, 0x09]).await.unwrap();

        assert_eq!(read_frame(&mut client).await, &[0x70, 0x02, 0x00, 0x09]);
    }

    #[tokio::test]
    async fn qos2_packet_id_reuse_closes_the_connection() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        client
            .write_all(&[0x34, 0x06, 0x00, 0x01, b't', 0x00, 0x05, b'x'])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut client).await, &[0x50, 0x02, 0x00, 0x05]);

        // the same id again before PUBREL resolved the first exchange.
        client
            .write_all(&[0x34, 0x06, 0x00, 0x01, b't', 0x00, 0x05, b'x'])
            .await
            .unwrap();

        expect_eof(&mut client).await;
    }

    #[tokio::test]
    async fn disconnect_removes_subscriptions() {
        let broker = test_broker();

        let mut client = connect(&broker).await;
        client.write_all(SUBSCRIBE_HELLO).await.unwrap();
        assert_eq!(read_frame(&mut client).await, SUBACK_PID1_QOS0);

        client.write_all(&[0xE0, 0x00]).await.unwrap();
        expect_eof(&mut client).await;

        assert!(broker.routing().read().await.subscribers_of("hello").is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_registration() {
        let broker = test_broker();

        let mut client = connect(&broker).await;
        client.write_all(SUBSCRIBE_HELLO).await.unwrap();
        assert_eq!(read_frame(&mut client).await, SUBACK_PID1_QOS0);

        // UNSUBSCRIBE pid 2, topic "hello".
        client
            .write_all(&[0xA2, 0x09, 0x00, 0x02, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o'])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut client).await, &[0xB0, 0x02, 0x00, 0x02]);

        assert!(broker.routing().read().await.subscribers_of("hello").is_empty());
    }

    #[tokio::test]
    async fn second_connect_is_a_protocol_violation() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        client.write_all(CONNECT).await.unwrap();

        expect_eof(&mut client).await;
    }

    #[tokio::test]
    async fn malformed_packet_closes_the_connection() {
        let broker = test_broker();
        let mut client = connect(&broker).await;

        // reserved packet type 0.
        client.write_all(&[0x00, 0x00]).await.unwrap();

        expect_eof(&mut client).await;
    }

    #[tokio::test]
    async fn ungraceful_close_publishes_the_will() {
        let broker = test_broker();

        let will = Will::new(
            "status".to_string(),
            Bytes::from_static(b"gone"),
            QosLevel::AtMostOnce,
            false,
        );
        let packet = ConnectPacket::new(true, 60, "dev-1".to_string(), Some(will), None, None);
        let doomed = connect_as(&broker, &packet).await;

        let mut watcher = connect(&broker).await;
        // SUBSCRIBE pid 1, topic "status", requested QoS 0.
        watcher
            .write_all(&[0x82, 0x0B, 0x00, 0x01, 0x00, 0x06, b's', b't', b'a', b't', b'u', b's', 0x00])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut watcher).await, SUBACK_PID1_QOS0);

        // dropping the transport without a DISCONNECT triggers the will.
        drop(doomed);

        assert_eq!(
            read_frame(&mut watcher).await,
            &[0x30, 0x0C, 0x00, 0x06, b's', b't', b'a', b't', b'u', b's', b'g', b'o', b'n', b'e']
        );
    }

    #[tokio::test]
    async fn clean_disconnect_discards_the_will() {
        let broker = test_broker();

        let will = Will::new(
            "status".to_string(),
            Bytes::from_static(b"gone"),
            QosLevel::AtMostOnce,
            false,
        );
        let packet = ConnectPacket::new(true, 60, "dev-2".to_string(), Some(will), None, None);
        let mut doomed = connect_as(&broker, &packet).await;

        doomed.write_all(&[0xE0, 0x00]).await.unwrap();
        expect_eof(&mut doomed).await;

        assert!(broker.stores().wills.take("dev-2").unwrap().is_none());
    }

    #[tokio::test]
    async fn retained_message_is_delivered_before_the_suback() {
        let broker = test_broker();

        let mut publisher = connect(&broker).await;
        // PUBLISH retain, topic "conf", payload "v1".
        publisher
            .write_all(&[0x31, 0x08, 0x00, 0x04, b'c', b'o', b'n', b'f', b'v', b'1'])
            .await
            .unwrap();

        // the retain upsert happens before the publisher's next packet is
        // processed; a ping round-trip orders the test after it.
        publisher.write_all(&[0xC0, 0x00]).await.unwrap();
        assert_eq!(read_frame(&mut publisher).await, &[0xD0, 0x00]);

        let mut subscriber = connect(&broker).await;
        // SUBSCRIBE pid 1, topic "conf", requested QoS 0.
        subscriber
            .write_all(&[0x82, 0x09, 0x00, 0x01, 0x00, 0x04, b'c', b'o', b'n', b'f', 0x00])
            .await
            .unwrap();

        // retained copy first, flagged retained, then the SUBACK.
        assert_eq!(
            read_frame(&mut subscriber).await,
            &[0x31, 0x08, 0x00, 0x04, b'c', b'o', b'n', b'f', b'v', b'1']
        );
        assert_eq!(read_frame(&mut subscriber).await, SUBACK_PID1_QOS0);
    }

    #[tokio::test]
    async fn empty_retained_payload_clears_the_slot() {
        let broker = test_broker();

        let mut publisher = connect(&broker).await;
        publisher
            .write_all(&[0x31, 0x08, 0x00, 0x04, b'c', b'o', b'n', b'f', b'v', b'1'])
            .await
            .unwrap();
        // retained PUBLISH with a zero byte payload removes the message.
        publisher
            .write_all(&[0x31, 0x06, 0x00, 0x04, b'c', b'o', b'n', b'f'])
            .await
            .unwrap();
        publisher.write_all(&[0xC0, 0x00]).await.unwrap();
        assert_eq!(read_frame(&mut publisher).await, &[0xD0, 0x00]);

        let mut subscriber = connect(&broker).await;
        subscriber
            .write_all(&[0x82, 0x09, 0x00, 0x01, 0x00, 0x04, b'c', b'o', b'n', b'f', 0x00])
            .await
            .unwrap();

        // no retained frame precedes the SUBACK.
        assert_eq!(read_frame(&mut subscriber).await, SUBACK_PID1_QOS0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_watchdog_closes_idle_connections() {
        let broker = test_broker();

        let packet = ConnectPacket::new(true, 1, "idler".to_string(), None, None, None);
        let mut client = connect_as(&broker, &packet).await;

        // no packet for 1.5x the 1s keep alive: the broker hangs up.
        expect_eof(&mut client).await;
    }
}
