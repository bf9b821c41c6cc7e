//! Recording transport for tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use tokio::time::Instant;

use super::config::SessionConfig;
use super::message::InboundMessage;
use super::transport::{LastWill, LinkError, Telemetry, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Default)]
pub struct MockState {
    pub connect_attempts: Vec<Instant>,
    pub wills: Vec<LastWill>,
    pub published: Vec<Published>,
    pub subscribed: Vec<String>,
    pub links_prepared: usize,
    pub refuse_connect: bool,
    pub fail_publish: bool,
    pub iterations: VecDeque<Result<Vec<InboundMessage>, TransportError>>,
    pub telemetry: Vec<Telemetry>,
    pub iteration_delay: Duration,
    pub clock: Option<DateTime<Utc>>,
}

impl MockState {
    pub fn published_to(&self, topic: &str) -> Vec<&Published> {
        self.published.iter().filter(|p| p.topic == topic).collect()
    }

    pub fn subscriptions_to(&self, topic: &str) -> usize {
        self.subscribed.iter().filter(|t| *t == topic).count()
    }
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> (Self, Rc<RefCell<MockState>>) {
        let transport = Self::default();
        let state = transport.state.clone();
        (transport, state)
    }
}

impl Transport for MockTransport {
    async fn prepare_link(&mut self) -> Result<(), LinkError> {
        self.state.borrow_mut().links_prepared += 1;
        Ok(())
    }

    fn set_last_will(&mut self, will: LastWill) {
        self.state.borrow_mut().wills.push(will);
    }

    async fn connect(&mut self, session: &SessionConfig) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        state.connect_attempts.push(Instant::now());
        if state.refuse_connect {
            Err(TransportError::Unreachable(format!(
                "{}:{} refused",
                session.host, session.port
            )))
        } else {
            Ok(())
        }
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
        _qos: QoS,
    ) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_publish {
            return Err(TransportError::ConnectionLost("broken pipe".to_string()));
        }
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.state.borrow_mut().subscribed.push(topic.to_string());
        Ok(())
    }

    async fn run_iteration(
        &mut self,
        _timeout: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let delay = self.state.borrow().iteration_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state
            .borrow_mut()
            .iterations
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout))
    }

    fn platform_telemetry(&mut self) -> Vec<Telemetry> {
        self.state.borrow().telemetry.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.state.borrow().clock.unwrap_or_else(Utc::now)
    }
}

/// A packet the fake broker read from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenPacket {
    pub kind: u8,
    pub topic: Option<String>,
    pub payload: Vec<u8>,
    pub retain: bool,
}

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const SUBSCRIBE: u8 = 8;

impl SeenPacket {
    fn parse(header: u8, body: &[u8]) -> Self {
        let kind = header >> 4;
        let mut packet = SeenPacket {
            kind,
            topic: None,
            payload: Vec::new(),
            retain: header & 0x01 == 1,
        };
        let topic_at = match kind {
            PUBLISH => 0,
            SUBSCRIBE => 2,
            _ => return packet,
        };
        let len = u16::from_be_bytes([body[topic_at], body[topic_at + 1]]) as usize;
        let start = topic_at + 2;
        packet.topic = Some(String::from_utf8_lossy(&body[start..start + len]).into_owned());
        if kind == PUBLISH {
            let qos = (header >> 1) & 0x03;
            let payload_at = start + len + if qos > 0 { 2 } else { 0 };
            packet.payload = body[payload_at..].to_vec();
        }
        packet
    }
}

/// Single-connection MQTT broker on a loopback port. Answers CONNECT (unless silent),
/// SUBSCRIBE and PINGREQ, and reports every packet it reads.
pub struct FakeBroker {
    pub port: u16,
    seen: tokio::sync::mpsc::UnboundedReceiver<SeenPacket>,
    to_client: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    pub packets: Vec<SeenPacket>,
}

impl FakeBroker {
    pub async fn start(answer_connect: bool) -> Self {
        use tokio::io::AsyncWriteExt;
        use tokio::sync::mpsc::unbounded_channel;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen) = unbounded_channel();
        let (to_client, mut outgoing) = unbounded_channel::<Vec<u8>>();
        let replies = to_client.clone();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (mut reader, mut writer) = stream.into_split();
            tokio::spawn(async move {
                // An empty frame closes the connection.
                while let Some(bytes) = outgoing.recv().await {
                    if bytes.is_empty() || writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            });
            while let Some((header, body)) = read_packet(&mut reader).await {
                let reply = match header >> 4 {
                    CONNECT if answer_connect => Some(vec![0x20, 0x02, 0x00, 0x00]),
                    SUBSCRIBE => Some(vec![0x90, 0x03, body[0], body[1], 0x00]),
                    12 => Some(vec![0xD0, 0x00]),
                    _ => None,
                };
                if let Some(reply) = reply {
                    let _ = replies.send(reply);
                }
                if seen_tx.send(SeenPacket::parse(header, &body)).is_err() {
                    break;
                }
            }
        });

        Self {
            port,
            seen,
            to_client,
            packets: Vec::new(),
        }
    }

    pub fn session(&self) -> SessionConfig {
        let mut session = SessionConfig::new("127.0.0.1", self.port, "brickmaster-test");
        session.connect_timeout = Duration::from_millis(500);
        session
    }

    pub fn send_publish(&self, topic: &str, payload: &str) {
        let mut body = (topic.len() as u16).to_be_bytes().to_vec();
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload.as_bytes());
        let mut frame = vec![0x30];
        frame.extend(encode_length(body.len()));
        frame.extend(body);
        let _ = self.to_client.send(frame);
    }

    pub fn disconnect(&self) {
        let _ = self.to_client.send(Vec::new());
    }

    /// Collects everything read so far without waiting.
    pub fn collect(&mut self) -> &[SeenPacket] {
        while let Ok(packet) = self.seen.try_recv() {
            self.packets.push(packet);
        }
        &self.packets
    }

    pub fn count(&mut self, kind: u8) -> usize {
        self.collect().iter().filter(|p| p.kind == kind).count()
    }
}

async fn read_packet(reader: &mut tokio::net::tcp::OwnedReadHalf) -> Option<(u8, Vec<u8>)> {
    use tokio::io::AsyncReadExt;

    let header = reader.read_u8().await.ok()?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await.ok()?;
        length |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn encode_length(mut length: usize) -> Vec<u8> {
    let mut encoded = Vec::new();
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        encoded.push(byte);
        if length == 0 {
            return encoded;
        }
    }
}
