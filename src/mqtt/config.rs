use std::time::Duration;

/// Root of every topic this system publishes or listens on.
pub const TOPIC_ROOT: &str = "brickmaster2";

/// Broker session parameters. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

/// Timing and naming for the network facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub system_name: String,
    pub session: SessionConfig,
    pub retry_interval: Duration,
    pub iteration_timeout: Duration,
}

impl NetworkSettings {
    pub fn new(system_name: impl Into<String>, session: SessionConfig) -> Self {
        Self {
            system_name: system_name.into(),
            session,
            retry_interval: Duration::from_secs(30),
            iteration_timeout: Duration::from_secs(1),
        }
    }

    /// `brickmaster2/<system-name>`
    pub fn topic_prefix(&self) -> String {
        format!("{}/{}", TOPIC_ROOT, self.system_name)
    }
}
