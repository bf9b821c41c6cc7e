//! Broker connection lifecycle
//!
//! ```text
//!                connect() ok
//! Disconnected ──► Connecting ──────────► Connected
//!      ▲               │                      │
//!      └───────────────┴──────────────────────┘
//!        connect failed      transport error during poll/publish
//! ```
//!
//! There is no terminal state: while disconnected, [`ConnectionManager::poll_tick`] retries
//! once the retry interval (30 s by default) has passed since the previous attempt.

use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::QoS;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::config::{NetworkSettings, SessionConfig};
use super::message::InboundMessage;
use super::registry::TopicRegistry;
use super::transport::{LastWill, Transport, TransportError};

/// Outbound entry name (and topic suffix) of the connectivity topic.
pub const CONNECTIVITY: &str = "connectivity";
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub connect_attempts: usize,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

pub struct ConnectionManager<T> {
    transport: T,
    session: SessionConfig,
    connectivity_topic: String,
    state: ConnectionState,
    last_attempt: Option<Instant>,
    retry_interval: Duration,
    iteration_timeout: Duration,
    stats: SessionStats,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, settings: &NetworkSettings) -> Self {
        Self {
            transport,
            session: settings.session.clone(),
            connectivity_topic: format!("{}/{}", settings.topic_prefix(), CONNECTIVITY),
            state: ConnectionState::default(),
            last_attempt: None,
            retry_interval: settings.retry_interval,
            iteration_timeout: settings.iteration_timeout,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn connectivity_topic(&self) -> &str {
        &self.connectivity_topic
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One connection attempt. The attempt time is recorded whatever the outcome, so the retry
    /// interval always counts from the latest attempt.
    pub async fn connect(&mut self, registry: &mut TopicRegistry) -> Result<(), TransportError> {
        self.last_attempt = Some(Instant::now());
        self.stats.connect_attempts += 1;
        self.state = ConnectionState::Connecting;

        info!("Creating last will.");
        self.transport
            .set_last_will(LastWill::retained(&self.connectivity_topic, OFFLINE));

        if let Err(e) = self.transport.connect(&self.session).await {
            self.state = ConnectionState::Disconnected;
            warn!("Could not connect to MQTT broker: {}", e);
            return Err(e);
        }

        if let Err(e) =
            self.transport
                .publish(&self.connectivity_topic, ONLINE, true, QoS::AtMostOnce)
        {
            self.mark_lost(&e);
            return Err(e);
        }
        self.stats.messages_sent += 1;
        registry.mark_published(CONNECTIVITY, ONLINE);

        for topic in registry.inbound_topics() {
            debug!("Subscribing to {}", topic);
            if let Err(e) = self.transport.subscribe(topic) {
                self.mark_lost(&e);
                return Err(e);
            }
        }

        self.state = ConnectionState::Connected;
        info!(
            "MQTT session established, {} inbound topics subscribed",
            registry.inbound_count()
        );
        Ok(())
    }

    /// Drives the session for one tick and returns any inbound messages.
    pub async fn poll_tick(&mut self, registry: &mut TopicRegistry) -> Vec<InboundMessage> {
        if self.state != ConnectionState::Connected {
            if let Some(last) = self.last_attempt {
                if last.elapsed() < self.retry_interval {
                    trace!("Reconnect not yet due");
                    return Vec::new();
                }
            }
            info!("Attempting to reconnect to the MQTT broker");
            // Failure is logged inside connect; the next attempt waits for the retry interval.
            let _ = self.connect(registry).await;
            return Vec::new();
        }

        match self.transport.run_iteration(self.iteration_timeout).await {
            Ok(mut messages) => {
                if !messages.is_empty() {
                    let now = self.local_now();
                    for message in &mut messages {
                        message.received = now.naive_local();
                    }
                    self.stats.messages_received += messages.len();
                    self.stats.last_activity = Some(now);
                }
                messages
            }
            Err(TransportError::Timeout) => {
                trace!("Network iteration timed out with no traffic");
                Vec::new()
            }
            Err(e) => {
                self.mark_lost(&e);
                Vec::new()
            }
        }
    }

    /// Publishes through the transport. Returns `false` if the transport refused, in which case
    /// the session is considered lost.
    pub fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        debug!("Publishing to '{}': '{}'", topic, payload);
        match self
            .transport
            .publish(topic, payload, retain, QoS::AtMostOnce)
        {
            Ok(()) => {
                self.stats.messages_sent += 1;
                self.stats.last_activity = Some(self.local_now());
                true
            }
            Err(e) => {
                self.mark_lost(&e);
                false
            }
        }
    }

    pub fn subscribe(&mut self, topic: &str) -> bool {
        match self.transport.subscribe(topic) {
            Ok(()) => true,
            Err(e) => {
                self.mark_lost(&e);
                false
            }
        }
    }

    /// Device time, taken from the transport so a synchronised clock is honoured.
    fn local_now(&self) -> DateTime<Local> {
        self.transport.now().with_timezone(&Local)
    }

    fn mark_lost(&mut self, error: &TransportError) {
        warn!(
            "Connection to broker lost: {}. Marking as not connected, will retry.",
            error
        );
        self.state = ConnectionState::Disconnected;
    }
}
