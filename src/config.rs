//! # Device Configuration
//!
//! Everything a brickmaster2 device needs at startup lives in one TOML file: the system
//! identity, broker session, optional WiFi link, heap budget, controls and scripts.
//!
//! ## Error Handling Strategy
//! The `system` and `broker` sections are load-bearing; a missing or invalid value there is a
//! [`ConfigError`] and the process stops. Individual controls are not: an invalid control is
//! logged and discarded so the rest of the device still comes up.
//!
//! ## Lookup Order
//! 1. the path given on the command line
//! 2. `./config.toml`
//! 3. `<config dir>/brickmaster2/config.toml`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use serde::Deserialize;
use tokio::fs::{read_to_string, try_exists};
use tracing::{debug, error, info, Level};

use crate::mqtt::config::{NetworkSettings, SessionConfig, TOPIC_ROOT};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("System name must be non-empty and free of '/', '+' and '#', got '{0}'")]
    InvalidSystemName(String),

    #[error("Broker host must not be empty")]
    MissingBrokerHost,

    #[error("Platform 'constrained' requires a [wifi] section with an ssid")]
    MissingWifi,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Os,
    Constrained,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SystemSection {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub ntp_server: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BrokerSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct WifiSection {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_interface")]
    pub interface: String,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct HeapSection {
    #[serde(default)]
    pub limit_bytes: Option<usize>,
}

/// A control entry as written in the file, before validation.
#[derive(Deserialize, Clone, Debug)]
struct RawControl {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default = "default_control_type")]
    kind: String,
    #[serde(default)]
    pin: Option<u8>,
    #[serde(default)]
    invert: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlSettings {
    pub id: String,
    pub name: String,
    pub pin: u8,
    pub invert: bool,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScriptSettings {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ScriptSettings {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub system: SystemSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub wifi: Option<WifiSection>,
    #[serde(default)]
    pub heap: HeapSection,
    #[serde(default)]
    controls: Vec<RawControl>,
    #[serde(default)]
    pub scripts: Vec<ScriptSettings>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_port() -> u16 {
    1883
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_control_type() -> String {
    "gpio".to_string()
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.system.name;
        if name.is_empty() || name.contains(['/', '+', '#']) {
            return Err(ConfigError::InvalidSystemName(name.clone()));
        }
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::MissingBrokerHost);
        }
        if self.system.platform == Platform::Constrained
            && self.wifi.as_ref().map_or(true, |wifi| wifi.ssid.is_empty())
        {
            return Err(ConfigError::MissingWifi);
        }
        Ok(())
    }

    /// Reads the first configuration file found in the lookup order.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::locate().await?,
        };
        info!("Loading configuration from {}", path.display());
        let content = read_to_string(&path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        Settings::from_toml(&content).map_err(|e| eyre!("Invalid config {}: {}", path.display(), e))
    }

    async fn locate() -> Result<PathBuf> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join(TOPIC_ROOT).join(CONFIG_FILE));
        }
        for candidate in &candidates {
            debug!("Looking for configuration at {}", candidate.display());
            if try_exists(candidate).await.unwrap_or(false) {
                return Ok(candidate.clone());
            }
        }
        Err(eyre!(
            "No configuration file found, tried: {}",
            candidates
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Unknown names fall back to INFO.
    pub fn log_level(&self) -> Level {
        parse_level(&self.system.log_level)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.system.poll_interval_ms.max(1))
    }

    pub fn network_settings(&self) -> NetworkSettings {
        let client_id = self
            .broker
            .client_id
            .clone()
            .unwrap_or_else(|| self.system.name.clone());
        let session = SessionConfig::new(&self.broker.host, self.broker.port, client_id)
            .with_credentials(self.broker.username.clone(), self.broker.password.clone());
        NetworkSettings::new(&self.system.name, session)
    }

    /// Valid controls only. Entries without a pin, with an unsupported type or with a
    /// duplicate id are logged and dropped.
    pub fn controls(&self) -> Vec<ControlSettings> {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        for raw in &self.controls {
            if !raw.kind.eq_ignore_ascii_case("gpio") {
                error!(
                    "Control '{}' has unsupported type '{}'. Discarding.",
                    raw.id, raw.kind
                );
                continue;
            }
            let Some(pin) = raw.pin else {
                error!("Control '{}' has no pin defined. Discarding.", raw.id);
                continue;
            };
            if !seen.insert(raw.id.clone()) {
                error!("Control id '{}' is already defined. Discarding.", raw.id);
                continue;
            }
            valid.push(ControlSettings {
                id: raw.id.clone(),
                name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
                pin,
                invert: raw.invert,
            });
        }
        valid
    }
}

pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warning" | "warn" => Level::WARN,
        "error" | "critical" => Level::ERROR,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [system]
        name = "demo"

        [broker]
        host = "mqtt.local"
    "#;

    #[test]
    fn minimal_file_uses_defaults() {
        let settings = Settings::from_toml(MINIMAL).unwrap();
        assert_eq!(settings.system.platform, Platform::Os);
        assert_eq!(settings.broker.port, 1883);
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.log_level(), Level::INFO);

        let network = settings.network_settings();
        assert_eq!(network.session.client_id, "demo");
        assert_eq!(network.topic_prefix(), "brickmaster2/demo");
        assert_eq!(network.retry_interval, Duration::from_secs(30));
    }

    #[test]
    fn invalid_controls_are_discarded() {
        let content = format!(
            "{}{}",
            MINIMAL,
            r#"
            [[controls]]
            id = "light1"
            name = "Light 1"
            pin = 17

            [[controls]]
            id = "nopin"

            [[controls]]
            id = "servo"
            type = "pwm"
            pin = 4

            [[controls]]
            id = "light1"
            pin = 18
            invert = true
            "#
        );
        let settings = Settings::from_toml(&content).unwrap();
        assert_eq!(
            settings.controls(),
            vec![ControlSettings {
                id: "light1".to_string(),
                name: "Light 1".to_string(),
                pin: 17,
                invert: false,
            }]
        );
    }

    #[test]
    fn rejects_wildcards_in_system_name() {
        let content = MINIMAL.replace("\"demo\"", "\"demo/#\"");
        assert_eq!(
            Settings::from_toml(&content).unwrap_err(),
            ConfigError::InvalidSystemName("demo/#".to_string())
        );
    }

    #[test]
    fn constrained_platform_requires_wifi() {
        let content = MINIMAL.replace("name = \"demo\"", "name = \"demo\"\nplatform = \"constrained\"");
        assert_eq!(
            Settings::from_toml(&content).unwrap_err(),
            ConfigError::MissingWifi
        );

        let with_wifi = format!("{}\n[wifi]\nssid = \"lab\"\npassword = \"secret\"\n", content);
        let settings = Settings::from_toml(&with_wifi).unwrap();
        assert_eq!(settings.wifi.unwrap().interface, "wlan0");
    }

    #[test]
    fn missing_broker_is_fatal() {
        let result = Settings::from_toml("[system]\nname = \"demo\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn credentials_and_client_id_pass_through() {
        let content = MINIMAL.replace(
            "host = \"mqtt.local\"",
            "host = \"mqtt.local\"\nport = 8883\nusername = \"bm\"\npassword = \"pw\"\nclient_id = \"bm-1\"",
        );
        let session = Settings::from_toml(&content).unwrap().network_settings().session;
        assert_eq!(session.port, 8883);
        assert_eq!(session.client_id, "bm-1");
        assert_eq!(session.username.as_deref(), Some("bm"));
        assert_eq!(session.password.as_deref(), Some("pw"));
    }

    #[test]
    fn level_names_map_like_the_config_file_documents() {
        assert_eq!(parse_level("WARNING"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn script_name_defaults_to_id() {
        let script = ScriptSettings {
            id: "intro".to_string(),
            name: None,
        };
        assert_eq!(script.display_name(), "intro");
    }
}
