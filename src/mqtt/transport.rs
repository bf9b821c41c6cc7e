//! Transport seam between the session layer and a concrete network stack
//!
//! Two implementations exist:
//!
//! - [`OsTransport`](super::os_transport::OsTransport) relies on the operating system for
//!   connectivity and only speaks MQTT.
//! - [`ConstrainedTransport`](super::constrained::ConstrainedTransport) additionally owns
//!   WiFi association, clock sync and heap accounting.
//!
//! Inbound messages are returned from [`Transport::run_iteration`] instead of being pushed
//! through callbacks; routing to registered handlers happens in the dispatcher.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::QoS;

use super::config::SessionConfig;
use super::message::InboundMessage;

/// Message the broker delivers on our behalf if the session dies silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub qos: QoS,
}

impl LastWill {
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
            qos: QoS::AtMostOnce,
        }
    }
}

/// A platform telemetry reading, addressed by the suffix under the system prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub suffix: String,
    pub payload: String,
}

/// Recoverable transport failures. All of these end up as a state change in the
/// connection manager, never as a process exit.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Request rejected by client: {0}")]
    Rejected(String),

    #[error("No session established")]
    NotConnected,

    #[error("Iteration timed out")]
    Timeout,
}

/// Link-layer failures on platforms that manage their own connectivity.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Could not associate with network '{ssid}' after {attempts} attempts")]
    AssociationExhausted { ssid: String, attempts: u32 },
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Platform pre-step run before connecting and at the start of every poll.
    async fn prepare_link(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    /// Must be called before every [`Transport::connect`]; the will is bound at connect time.
    fn set_last_will(&mut self, will: LastWill);

    async fn connect(&mut self, session: &SessionConfig) -> Result<(), TransportError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Drives the network for at most `timeout`, returning whatever arrived.
    async fn run_iteration(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    fn platform_telemetry(&mut self) -> Vec<Telemetry>;

    /// Wall-clock time as this platform knows it. Boards without a real-time clock report
    /// their network-synchronised time here.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
