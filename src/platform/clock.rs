//! Network time for boards without a battery-backed clock

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sntpc::{get_time, NtpContext, StdTimestampGen};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

const NTP_PORT: u16 = 123;

#[derive(Debug, thiserror::Error)]
pub enum TimeSyncError {
    #[error("Time server unreachable: {0}")]
    Unreachable(#[from] std::io::Error),

    #[error("Time server did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Time server '{0}' did not resolve")]
    Unresolved(String),

    #[error("SNTP exchange failed: {0}")]
    Protocol(String),
}

#[allow(async_fn_in_trait)]
pub trait TimeSource {
    async fn fetch_time(&mut self) -> Result<DateTime<Utc>, TimeSyncError>;
}

/// SNTP client backed by `sntpc` over a tokio socket.
pub struct SntpClient {
    server: String,
    wait: Duration,
}

impl SntpClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            wait: Duration::from_secs(2),
        }
    }

    fn address(&self) -> String {
        if self.server.contains(':') {
            self.server.clone()
        } else {
            format!("{}:{}", self.server, NTP_PORT)
        }
    }
}

impl TimeSource for SntpClient {
    async fn fetch_time(&mut self) -> Result<DateTime<Utc>, TimeSyncError> {
        let server = lookup_host(self.address())
            .await?
            .next()
            .ok_or_else(|| TimeSyncError::Unresolved(self.server.clone()))?;
        let local = if server.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local).await?;
        let context = NtpContext::new(StdTimestampGen::default());

        let result = timeout(self.wait, get_time(server, &socket, context))
            .await
            .map_err(|_| TimeSyncError::Timeout(self.wait))?
            .map_err(|e| TimeSyncError::Protocol(format!("{:?}", e)))?;
        // offset is the correction to the local clock in microseconds
        Ok(Utc::now() + TimeDelta::microseconds(result.offset()))
    }
}

/// Software real-time clock: the system clock corrected by the last network sync.
#[derive(Debug, Clone, Default)]
pub struct SoftRtc {
    offset: TimeDelta,
    synced_at: Option<DateTime<Utc>>,
}

impl SoftRtc {
    pub fn set(&mut self, network_time: DateTime<Utc>) -> TimeDelta {
        self.offset = network_time - Utc::now();
        self.synced_at = Some(network_time);
        self.offset
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }
}
