use std::path::PathBuf;
use std::time::Duration;

use rumqttc::QoS;
use tracing::debug;

use super::config::SessionConfig;
use super::message::InboundMessage;
use super::session::MqttSession;
use super::transport::{LastWill, Telemetry, Transport, TransportError};
use crate::platform::meminfo::{parse_proc_meminfo, MemoryReport};

const PROC_MEMINFO: &str = "/proc/meminfo";

/// General-purpose OS transport. Connectivity is the operating system's problem; this only
/// carries the MQTT session and reports system memory.
pub struct OsTransport {
    session: MqttSession,
    meminfo_path: PathBuf,
}

impl Default for OsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl OsTransport {
    pub fn new() -> Self {
        Self {
            session: MqttSession::new(),
            meminfo_path: PathBuf::from(PROC_MEMINFO),
        }
    }

    fn read_memory(&self) -> Option<MemoryReport> {
        let raw = match std::fs::read_to_string(&self.meminfo_path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Unable to read {}: {}", self.meminfo_path.display(), e);
                return None;
            }
        };
        let (avail_kb, total_kb) = parse_proc_meminfo(&raw)?;
        Some(MemoryReport::from_available(avail_kb * 1024, total_kb * 1024))
    }
}

impl Transport for OsTransport {
    fn set_last_will(&mut self, will: LastWill) {
        self.session.set_last_will(will);
    }

    async fn connect(&mut self, session: &SessionConfig) -> Result<(), TransportError> {
        self.session.connect(session).await
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.session.publish(topic, payload, retain, qos)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.session.subscribe(topic)
    }

    async fn run_iteration(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        self.session.run_iteration(timeout).await
    }

    fn platform_telemetry(&mut self) -> Vec<Telemetry> {
        match self.read_memory() {
            Some(report) => vec![report.to_telemetry()],
            None => Vec::new(),
        }
    }
}
