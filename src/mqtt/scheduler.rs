//! Change-driven publishing of outbound state
//!
//! Every tick each outbound entry is read and compared with the value last handed to the
//! transport. Only changed values (or entries flagged `repeat`) go out. The previous value is
//! updated once the transport accepts the publish call; a refused call leaves it untouched so
//! the value is sent again after reconnecting.

use std::collections::HashMap;

use tracing::debug;

use super::connection::ConnectionManager;
use super::registry::TopicRegistry;
use super::transport::Transport;

#[derive(Debug, Default)]
pub struct PublishScheduler {
    telemetry_previous: HashMap<String, String>,
}

impl PublishScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of publishes issued.
    pub fn publish_all<T: Transport>(
        &mut self,
        registry: &mut TopicRegistry,
        connection: &mut ConnectionManager<T>,
    ) -> usize {
        let mut published = 0;
        for (name, entry) in registry.outbound_mut() {
            if !connection.is_connected() {
                debug!("Connection dropped mid-pass, deferring remaining outbound topics");
                break;
            }
            let Some(value) = entry.read() else {
                debug!("Could not read value for '{}', skipping this tick", name);
                continue;
            };
            if !entry.needs_publish(&value) {
                continue;
            }
            if connection.publish(&entry.topic, &value, entry.retain) {
                entry.mark_published(value);
                published += 1;
            }
        }
        published
    }

    /// Publishes platform telemetry under `prefix`, suppressing unchanged readings.
    pub fn publish_telemetry<T: Transport>(
        &mut self,
        prefix: &str,
        connection: &mut ConnectionManager<T>,
    ) -> usize {
        let readings = connection.transport_mut().platform_telemetry();
        let mut published = 0;
        for reading in readings {
            if !connection.is_connected() {
                break;
            }
            let topic = format!("{}/{}", prefix, reading.suffix);
            if self.telemetry_previous.get(&topic) == Some(&reading.payload) {
                continue;
            }
            if connection.publish(&topic, &reading.payload, false) {
                self.telemetry_previous.insert(topic, reading.payload);
                published += 1;
            }
        }
        published
    }
}
