//! WiFi association for boards that own their radio

use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("Radio command failed: {0}")]
    Command(#[from] std::io::Error),

    #[error("Association with '{ssid}' rejected: {reason}")]
    Rejected { ssid: String, reason: String },
}

#[allow(async_fn_in_trait)]
pub trait WifiRadio {
    async fn is_associated(&mut self) -> bool;

    async fn associate(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError>;

    /// Hardware address for the log, if the radio exposes one.
    fn hardware_address(&self) -> Option<String> {
        None
    }
}

/// Radio managed through NetworkManager's `nmcli`.
pub struct NmcliRadio {
    interface: String,
}

impl NmcliRadio {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }
}

impl WifiRadio for NmcliRadio {
    async fn is_associated(&mut self) -> bool {
        let output = Command::new("nmcli")
            .args(["-t", "-f", "DEVICE,STATE", "device"])
            .output()
            .await;
        match output {
            Ok(output) => device_connected(&String::from_utf8_lossy(&output.stdout), &self.interface),
            Err(e) => {
                debug!("nmcli unavailable: {}", e);
                false
            }
        }
    }

    async fn associate(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError> {
        let output = Command::new("nmcli")
            .args(["device", "wifi", "connect", ssid, "password", passphrase])
            .args(["ifname", self.interface.as_str()])
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RadioError::Rejected {
                ssid: ssid.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn hardware_address(&self) -> Option<String> {
        let path = format!("/sys/class/net/{}/address", self.interface);
        std::fs::read_to_string(path)
            .ok()
            .map(|mac| mac.trim().to_uppercase())
    }
}

/// Parses terse `nmcli -t -f DEVICE,STATE device` output.
fn device_connected(listing: &str, interface: &str) -> bool {
    listing.lines().any(|line| {
        let mut fields = line.split(':');
        fields.next() == Some(interface) && fields.next() == Some("connected")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_device_state_from_nmcli_listing() {
        let listing = "eth0:unavailable\nwlan0:connected\nlo:unmanaged\n";
        assert!(device_connected(listing, "wlan0"));
        assert!(!device_connected(listing, "eth0"));
        assert!(!device_connected("wlan0:disconnected\n", "wlan0"));
    }
}
