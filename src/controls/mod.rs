//! Physical controls exposed over MQTT
//!
//! A control starts life as an [`GpioControl<Unclaimed>`](gpio::GpioControl) built from the
//! configuration file. Claiming binds it to an output line and moves it into the `Active`
//! state, the only state that can be registered with the network layer. Claiming always
//! drives the control to OFF.
//!
//! Inbound payloads are `on` or `off` (any case). The status topic reports `ON`, `OFF` or
//! `Unavailable`, retained and only when the value changes.

pub mod gpio;

pub use gpio::{GpioControl, OutputLine, PinSource};

pub const ON: &str = "ON";
pub const OFF: &str = "OFF";
pub const UNAVAILABLE: &str = "Unavailable";

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("GPIO error on pin {pin}: {source}")]
    Gpio {
        pin: u8,
        #[source]
        source: rppal::gpio::Error,
    },

    #[error("Pin {0} is not available")]
    PinUnavailable(u8),

    #[error("Failed to open GPIO peripheral: {0}")]
    Peripheral(#[from] rppal::gpio::Error),
}
