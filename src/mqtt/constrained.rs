//! Transport for boards that manage their own WiFi link
//!
//! On top of the MQTT session this owns three platform duties that a general-purpose OS would
//! otherwise handle:
//!
//! - **Association**: joins the configured network, pausing 30 s between failed attempts. After
//!   five consecutive failures the board has no purpose and [`LinkError::AssociationExhausted`]
//!   is returned for the caller to halt on.
//! - **Clock sync**: every 8 hours the soft RTC is corrected from an SNTP server. An unreachable
//!   server is skipped until the next window.
//! - **Heap telemetry**: free/used figures come from allocator counters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::message::InboundMessage;
use super::session::MqttSession;
use super::transport::{LastWill, LinkError, Telemetry, Transport, TransportError};
use crate::platform::clock::{SoftRtc, TimeSource};
use crate::platform::heap::HeapCounters;
use crate::platform::meminfo::MemoryReport;
use crate::platform::wifi::WifiRadio;

pub const ASSOCIATION_ATTEMPTS: u32 = 5;
pub const ASSOCIATION_PAUSE: Duration = Duration::from_secs(30);
pub const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

pub struct ConstrainedTransport<R, C, H> {
    radio: R,
    time_source: Option<C>,
    heap: H,
    credentials: WifiCredentials,
    session: MqttSession,
    rtc: SoftRtc,
    last_clock_attempt: Option<Instant>,
    hardware_logged: bool,
}

impl<R, C, H> ConstrainedTransport<R, C, H>
where
    R: WifiRadio,
    C: TimeSource,
    H: HeapCounters,
{
    pub fn new(radio: R, time_source: Option<C>, heap: H, credentials: WifiCredentials) -> Self {
        Self {
            radio,
            time_source,
            heap,
            credentials,
            session: MqttSession::new(),
            rtc: SoftRtc::default(),
            last_clock_attempt: None,
            hardware_logged: false,
        }
    }

    pub fn rtc(&self) -> &SoftRtc {
        &self.rtc
    }

    async fn associate(&mut self) -> Result<(), LinkError> {
        if !self.hardware_logged {
            if let Some(mac) = self.radio.hardware_address() {
                info!("WiFi radio hardware address: {}", mac);
            }
            self.hardware_logged = true;
        }
        info!("Connecting to WiFi SSID {}", self.credentials.ssid);

        let mut failures = 0;
        loop {
            match self
                .radio
                .associate(&self.credentials.ssid, &self.credentials.passphrase)
                .await
            {
                Ok(()) => {
                    info!("Associated with {}", self.credentials.ssid);
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    if failures >= ASSOCIATION_ATTEMPTS {
                        error!(
                            "Could not connect to network after {} attempts! Halting!",
                            failures
                        );
                        return Err(LinkError::AssociationExhausted {
                            ssid: self.credentials.ssid.clone(),
                            attempts: failures,
                        });
                    }
                    warn!(
                        "Could not connect to network ({}). Retrying in {}s.",
                        e,
                        ASSOCIATION_PAUSE.as_secs()
                    );
                    sleep(ASSOCIATION_PAUSE).await;
                }
            }
        }
    }

    async fn sync_clock_if_due(&mut self) {
        let Some(source) = self.time_source.as_mut() else {
            return;
        };
        let now = Instant::now();
        if let Some(last) = self.last_clock_attempt {
            if now.duration_since(last) < CLOCK_SYNC_INTERVAL {
                return;
            }
        }
        self.last_clock_attempt = Some(now);

        match source.fetch_time().await {
            Ok(time) => {
                let offset = self.rtc.set(time);
                info!(
                    "Clock synchronised to {} (offset {} ms)",
                    time,
                    offset.num_milliseconds()
                );
            }
            Err(e) => debug!("Skipping clock sync: {}", e),
        }
    }
}

impl<R, C, H> Transport for ConstrainedTransport<R, C, H>
where
    R: WifiRadio,
    C: TimeSource,
    H: HeapCounters,
{
    async fn prepare_link(&mut self) -> Result<(), LinkError> {
        if !self.radio.is_associated().await {
            debug!("WiFi not associated, will attempt connection");
            self.associate().await?;
        }
        self.sync_clock_if_due().await;
        Ok(())
    }

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
        let report = match self.heap.mem_free() {
            Some(free) => MemoryReport::from_heap(free, self.heap.mem_alloc()),
            None => MemoryReport::unknown(),
        };
        vec![report.to_telemetry()]
    }

    fn now(&self) -> DateTime<Utc> {
        self.rtc.now()
    }
}
