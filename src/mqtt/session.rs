//! rumqttc-backed MQTT session shared by both transports
//!
//! rumqttc connects lazily when its event loop is polled, so a connect attempt here builds a
//! fresh client/event loop pair (carrying the current last will) and polls until the broker
//! acknowledges or the connect timeout runs out. The previous pair is dropped, which closes
//! its socket.
//!
//! The client's request channel only drains while the event loop is polled. Requests that do
//! not fit are held in a local backlog, in order, and fed to the channel from
//! [`MqttSession::run_iteration`] as the event loop consumes them. A burst of subscribes after
//! connect or a first publish pass over many controls therefore never overflows the channel.

use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace};

use super::config::SessionConfig;
use super::message::InboundMessage;
use super::transport::{LastWill, TransportError};

const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    },
    Subscribe {
        topic: String,
    },
}

pub struct MqttSession {
    will: Option<LastWill>,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    backlog: VecDeque<Request>,
}

impl Default for MqttSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttSession {
    pub fn new() -> Self {
        Self {
            will: None,
            client: None,
            event_loop: None,
            backlog: VecDeque::new(),
        }
    }

    pub fn set_last_will(&mut self, will: LastWill) {
        self.will = Some(will);
    }

    /// Requests accepted but not yet handed to the event loop.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn options(&self, session: &SessionConfig) -> MqttOptions {
        let mut options = MqttOptions::new(&session.client_id, &session.host, session.port);
        options.set_keep_alive(session.keep_alive);
        if let Some(username) = &session.username {
            options.set_credentials(username, session.password.clone().unwrap_or_default());
        }
        if let Some(will) = &self.will {
            options.set_last_will(rumqttc::LastWill::new(
                &will.topic,
                will.payload.as_bytes().to_vec(),
                will.qos,
                will.retain,
            ));
        }
        options
    }

    fn reset(&mut self) {
        self.client = None;
        self.event_loop = None;
        self.backlog.clear();
    }

    pub async fn connect(&mut self, session: &SessionConfig) -> Result<(), TransportError> {
        // Drop any previous session before opening a new socket.
        self.reset();

        let (client, mut event_loop) = AsyncClient::new(self.options(session), REQUEST_CAPACITY);
        let broker = format!("{}:{}", session.host, session.port);
        debug!("Opening MQTT session to {}", broker);

        let acknowledged = timeout(session.connect_timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(other) => trace!("Event before ConnAck: {:?}", other),
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match acknowledged {
            Ok(Ok(ack)) => {
                info!("Connected to broker {} ({:?})", broker, ack.code);
                self.client = Some(client);
                self.event_loop = Some(event_loop);
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Unreachable(format!("{}: {}", broker, e))),
            Err(_) => Err(TransportError::Unreachable(format!(
                "{}: no ConnAck within {:?}",
                broker, session.connect_timeout
            ))),
        }
    }

    pub fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.enqueue(Request::Publish {
            topic: checked_topic(topic)?,
            payload: payload.as_bytes().to_vec(),
            retain,
            qos,
        })
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.enqueue(Request::Subscribe {
            topic: checked_topic(topic)?,
        })
    }

    fn enqueue(&mut self, request: Request) -> Result<(), TransportError> {
        if self.client.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.backlog.push_back(request);
        self.feed_channel();
        Ok(())
    }

    /// Moves backlog entries into the client channel until it is full.
    fn feed_channel(&mut self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        while let Some(request) = self.backlog.front() {
            let sent = match request {
                Request::Publish {
                    topic,
                    payload,
                    retain,
                    qos,
                } => client.try_publish(topic.as_str(), *qos, *retain, payload.clone()),
                Request::Subscribe { topic } => {
                    client.try_subscribe(topic.as_str(), QoS::AtMostOnce)
                }
            };
            if sent.is_err() {
                trace!("Request channel full, {} requests waiting", self.backlog.len());
                break;
            }
            self.backlog.pop_front();
        }
    }

    /// Polls the event loop until `window` elapses. Returns [`TransportError::Timeout`] if the
    /// window passed without a single event.
    pub async fn run_iteration(
        &mut self,
        window: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        if self.event_loop.is_none() {
            return Err(TransportError::NotConnected);
        }
        let deadline = Instant::now() + window;
        let mut received = Vec::new();
        let mut saw_event = false;

        loop {
            self.feed_channel();
            let Some(event_loop) = self.event_loop.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            let polled = timeout_at(deadline, event_loop.poll()).await;
            match polled {
                Err(_) => break,
                Ok(Ok(event)) => {
                    saw_event = true;
                    if let Event::Incoming(Packet::Publish(publish)) = event {
                        received.push(InboundMessage::from_bytes(publish.topic, &publish.payload));
                    } else {
                        trace!("MQTT event: {:?}", event);
                    }
                }
                Ok(Err(e)) => {
                    self.reset();
                    return Err(lost(e));
                }
            }
        }

        if saw_event {
            Ok(received)
        } else {
            Err(TransportError::Timeout)
        }
    }
}

/// rumqttc refuses wildcard topics inside `try_publish`; reject them before they can wedge
/// the backlog.
fn checked_topic(topic: &str) -> Result<String, TransportError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(TransportError::Rejected(format!("invalid topic '{}'", topic)));
    }
    Ok(topic.to_string())
}

fn lost(error: ConnectionError) -> TransportError {
    TransportError::ConnectionLost(error.to_string())
}
