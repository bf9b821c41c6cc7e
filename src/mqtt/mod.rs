//! # MQTT Session Layer
//!
//! Keeps a brickmaster2 device attached to its broker and mirrors the state of its controls,
//! scripts and displays onto topics under `brickmaster2/<system>/`.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── transport.rs     - Transport trait, last will, telemetry and error types
//! ├── session.rs       - rumqttc client/event loop shared by both transports
//! ├── os_transport.rs  - General purpose OS transport
//! ├── constrained.rs   - WiFi-managed transport for constrained devices
//! ├── config.rs        - Session and network settings
//! ├── message.rs       - Inbound message representation
//! ├── registry.rs      - Inbound callbacks and outbound value sources
//! ├── connection.rs    - Connection lifecycle with fixed retry backoff
//! ├── scheduler.rs     - Last-value suppressed publishing
//! ├── dispatcher.rs    - Exact-match routing of inbound messages
//! └── network.rs       - The facade the rest of the device talks to
//! ```
//!
//! ## Lifecycle
//!
//! The facade is driven from a single cooperative loop. Each [`Network::poll`] call
//! re-establishes the link layer if needed, retries the broker connection at most once per
//! retry interval, processes at most one iteration window of inbound traffic and finally
//! publishes changed outbound values.
//!
//! The connectivity topic is retained. A last will of `offline` is registered before every
//! connection attempt and `online` is published immediately after each successful connect,
//! so subscribers always see the device's reachability.
//!
//! ## Failure Handling
//!
//! - Broker failures are never fatal; the manager goes back to `Disconnected` and waits
//!   for the next retry window
//! - An iteration window without traffic is not a failure
//! - Exhausting WiFi association attempts is fatal and surfaces as [`NetworkError::Link`]

pub mod config;
pub mod connection;
pub mod constrained;
pub mod dispatcher;
pub mod message;
#[cfg(test)]
pub(crate) mod mock;
pub mod network;
pub mod os_transport;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use network::{Network, NetworkError};
pub use transport::{Transport, TransportError};
