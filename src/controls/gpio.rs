use rppal::gpio::{Gpio, OutputPin};
use statum::{machine, state};
use tracing::{debug, info};

use super::{ControlError, OFF, ON, UNAVAILABLE};
use crate::items::{TopicDecl, TopicItem};

/// Outbound key for the control's status topic.
pub const STATUS_KEY: &str = "status";

/// A digital output the control can drive.
pub trait OutputLine {
    fn drive(&mut self, high: bool);
    fn is_driven_high(&self) -> bool;
}

impl OutputLine for OutputPin {
    fn drive(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }

    fn is_driven_high(&self) -> bool {
        self.is_set_high()
    }
}

/// Hands out output lines by pin number.
pub trait PinSource {
    fn claim_output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>, ControlError>;
}

impl PinSource for Gpio {
    fn claim_output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>, ControlError> {
        let output = self
            .get(pin)
            .map_err(|source| ControlError::Gpio { pin, source })?
            .into_output();
        Ok(Box::new(output))
    }
}

// Lifecycle of a GPIO control: configured from settings, then bound to a physical line.
#[state]
#[derive(Debug, Clone)]
pub enum ControlPhase {
    Unclaimed,
    Active,
}

#[machine]
pub struct GpioControl<S: ControlPhase> {
    id: String,
    name: String,
    pin: u8,
    invert: bool,
    line: Option<Box<dyn OutputLine>>,
}

impl GpioControl<Unclaimed> {
    pub fn create(id: impl Into<String>, name: impl Into<String>, pin: u8, invert: bool) -> Self {
        Self::new(id.into(), name.into(), pin, invert, None)
    }

    /// Claims the output line and drives it to the OFF state.
    pub fn claim(mut self, source: &mut impl PinSource) -> Result<GpioControl<Active>, ControlError> {
        debug!("Claiming pin {} for control '{}'", self.pin, self.name);
        self.line = Some(source.claim_output(self.pin)?);
        let mut active: GpioControl<Active> = self.transition();
        active.set(OFF);
        Ok(active)
    }
}

impl GpioControl<Active> {
    /// Accepts `on`/`off` in any case; anything else leaves the pin alone.
    pub fn set(&mut self, value: &str) {
        info!("Control: Setting control '{}' to '{}'", self.name, value);
        let on = match value.to_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => return,
        };
        if self.invert {
            debug!("Control '{}' is inverted", self.name);
        }
        if let Some(line) = self.line.as_mut() {
            line.drive(on != self.invert);
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.line {
            Some(line) if line.is_driven_high() != self.invert => ON,
            Some(_) => OFF,
            None => UNAVAILABLE,
        }
    }
}

impl TopicItem for GpioControl<Active> {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> Vec<TopicDecl> {
        vec![
            TopicDecl::inbound(format!("{}/set", self.id)),
            TopicDecl::outbound(format!("{}/status", self.id), true, false, STATUS_KEY),
        ]
    }

    fn read(&self, key: &str) -> Option<String> {
        match key {
            STATUS_KEY => Some(self.status().to_string()),
            _ => None,
        }
    }

    fn on_message(&mut self, _topic: &str, payload: &str) {
        debug!(
            "Control: Control '{}' ({}) received message '{}'",
            self.name, self.id, payload
        );
        match payload.trim().to_lowercase().as_str() {
            "on" | "off" => self.set(payload.trim()),
            _ => info!(
                "Control: Control '{}' ({}) received invalid command '{}'. Ignoring.",
                self.name, self.id, payload
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeLine(Rc<Cell<bool>>);

    impl OutputLine for FakeLine {
        fn drive(&mut self, high: bool) {
            self.0.set(high);
        }

        fn is_driven_high(&self) -> bool {
            self.0.get()
        }
    }

    struct FakePins {
        level: Rc<Cell<bool>>,
        valid: bool,
    }

    impl PinSource for FakePins {
        fn claim_output(&mut self, pin: u8) -> Result<Box<dyn OutputLine>, ControlError> {
            if self.valid {
                Ok(Box::new(FakeLine(self.level.clone())))
            } else {
                Err(ControlError::PinUnavailable(pin))
            }
        }
    }

    fn claimed(invert: bool) -> (GpioControl<Active>, Rc<Cell<bool>>) {
        let level = Rc::new(Cell::new(!invert));
        let mut pins = FakePins {
            level: level.clone(),
            valid: true,
        };
        let control = GpioControl::create("light1", "Light 1", 17, invert)
            .claim(&mut pins)
            .unwrap();
        (control, level)
    }

    #[test]
    fn claiming_switches_control_off() {
        let (control, level) = claimed(false);
        assert!(!level.get());
        assert_eq!(control.status(), "OFF");
    }

    #[test]
    fn commands_are_case_insensitive() {
        let (mut control, level) = claimed(false);
        control.on_message("brickmaster2/demo/controls/light1/set", "ON");
        assert!(level.get());
        assert_eq!(control.read(STATUS_KEY).as_deref(), Some("ON"));

        control.on_message("brickmaster2/demo/controls/light1/set", "Off");
        assert!(!level.get());
    }

    #[test]
    fn inverted_control_drives_low_for_on() {
        let (mut control, level) = claimed(true);
        assert!(level.get());
        assert_eq!(control.status(), "OFF");

        control.set("on");
        assert!(!level.get());
        assert_eq!(control.status(), "ON");
    }

    #[test]
    fn invalid_payload_is_ignored() {
        let (mut control, level) = claimed(false);
        control.on_message("t", "blink");
        assert!(!level.get());
        assert_eq!(control.status(), "OFF");
    }

    #[test]
    fn unavailable_pin_fails_claim() {
        let mut pins = FakePins {
            level: Rc::new(Cell::new(false)),
            valid: false,
        };
        let result = GpioControl::create("m", "Motor", 99, false).claim(&mut pins);
        assert!(matches!(result, Err(ControlError::PinUnavailable(99))));
    }

    #[test]
    fn declares_set_and_status_topics() {
        let (control, _) = claimed(false);
        assert_eq!(
            control.topics(),
            vec![
                TopicDecl::inbound("light1/set"),
                TopicDecl::outbound("light1/status", true, false, STATUS_KEY),
            ]
        );
    }
}
