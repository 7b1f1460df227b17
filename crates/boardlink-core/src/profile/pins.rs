//! Pin tables and pin capability checks

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

use crate::error::ConfigError;

bitflags! {
    /// What a single pin can be used for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PinCaps: u8 {
        /// Digital input/output and pin mode changes
        const DIGITAL = 1 << 0;
        /// PWM (analogWrite) output
        const PWM     = 1 << 1;
        /// Servo pulse output
        const SERVO   = 1 << 2;
        /// ADC input
        const ANALOG  = 1 << 3;
    }
}

/// The capability an operation requires from its pin argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Digital read/write and pin mode
    Digital,
    /// PWM output
    Pwm,
    /// Servo output
    Servo,
    /// Analog input
    Analog,
}

impl Capability {
    /// The flag a pin must carry for this capability
    pub const fn flag(self) -> PinCaps {
        match self {
            Self::Digital => PinCaps::DIGITAL,
            Self::Pwm => PinCaps::PWM,
            Self::Servo => PinCaps::SERVO,
            Self::Analog => PinCaps::ANALOG,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Digital => "digital",
            Self::Pwm => "PWM",
            Self::Servo => "servo",
            Self::Analog => "analog",
        };
        f.write_str(s)
    }
}

/// Wire flag marking an analog channel (`A<n>`) rather than a GPIO number
pub const ANALOG_CHANNEL_FLAG: u8 = 0x80;

/// Encode a physical pin identifier into its one-byte wire form
///
/// Numeric identifiers below 128 encode as themselves, `A<n>` encodes as
/// `0x80 | n`. Anything else has no wire form.
pub fn encode_pin_id(id: &str) -> Option<u8> {
    let id = id.trim();
    if let Some(channel) = id.strip_prefix('A').or_else(|| id.strip_prefix('a')) {
        let n: u8 = channel.parse().ok()?;
        if n < ANALOG_CHANNEL_FLAG {
            return Some(ANALOG_CHANNEL_FLAG | n);
        }
        return None;
    }
    let n: u8 = id.parse().ok()?;
    (n < ANALOG_CHANNEL_FLAG).then_some(n)
}

/// Render a wire pin byte back into its physical identifier
pub fn decode_pin_wire(wire: u8) -> String {
    if wire & ANALOG_CHANNEL_FLAG != 0 {
        format!("A{}", wire & !ANALOG_CHANNEL_FLAG)
    } else {
        wire.to_string()
    }
}

/// One pin of a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// Logical name shown to block authors (e.g. "D2")
    pub name: String,
    /// Physical identifier used by the firmware (e.g. "13" or "A0")
    pub id: String,
    /// Wire encoding of `id`
    pub wire: u8,
    /// What the pin can do
    pub caps: PinCaps,
}

/// The pins a board exposes, partitioned by capability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSpec {
    pins: Vec<Pin>,
}

impl PinSpec {
    /// Create an empty pin table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pin
    ///
    /// Fails if the logical name is already taken, the capability set is
    /// empty, or the physical identifier has no wire encoding.
    pub fn add(&mut self, name: &str, id: &str, caps: PinCaps) -> Result<(), ConfigError> {
        if caps.is_empty() {
            return Err(ConfigError::InvalidProfile(format!(
                "pin '{}' has no capabilities",
                name
            )));
        }
        if self.pins.iter().any(|p| p.name == name) {
            return Err(ConfigError::InvalidProfile(format!(
                "pin '{}' is defined twice",
                name
            )));
        }
        let wire = encode_pin_id(id).ok_or_else(|| {
            ConfigError::InvalidProfile(format!(
                "pin '{}' has unsupported physical identifier '{}'",
                name, id
            ))
        })?;
        self.pins.push(Pin {
            name: name.to_string(),
            id: id.to_string(),
            wire,
            caps,
        });
        Ok(())
    }

    /// All pins in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter()
    }

    /// Number of declared pins
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether no pins are declared
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Digital-capable pins
    pub fn digital(&self) -> impl Iterator<Item = &Pin> {
        self.with_caps(PinCaps::DIGITAL)
    }

    /// Analog-capable pins
    pub fn analog(&self) -> impl Iterator<Item = &Pin> {
        self.with_caps(PinCaps::ANALOG)
    }

    /// Pins carrying all of `caps`
    pub fn with_caps(&self, caps: PinCaps) -> impl Iterator<Item = &Pin> {
        self.pins.iter().filter(move |p| p.caps.contains(caps))
    }

    /// Find a pin by logical name, falling back to physical identifier
    pub fn find(&self, pin: &str) -> Option<&Pin> {
        self.pins
            .iter()
            .find(|p| p.name == pin)
            .or_else(|| self.pins.iter().find(|p| p.id == pin))
    }

    /// Find the pin with the given wire encoding
    pub fn by_wire(&self, wire: u8) -> Option<&Pin> {
        self.pins.iter().find(|p| p.wire == wire)
    }

    /// Resolve a pin argument for an operation needing `capability`
    ///
    /// The pin may be given by logical name or physical identifier. When the
    /// same physical pin is listed in several sets, the entry carrying the
    /// capability wins.
    pub fn resolve(&self, pin: &str, capability: Capability) -> Result<&Pin, ConfigError> {
        let flag = capability.flag();
        let mut found = false;
        for p in self.pins.iter().filter(|p| p.name == pin || p.id == pin) {
            found = true;
            if p.caps.contains(flag) {
                return Ok(p);
            }
        }
        if found {
            Err(ConfigError::MissingCapability {
                pin: pin.to_string(),
                required: capability,
            })
        } else {
            Err(ConfigError::UnknownPin {
                pin: pin.to_string(),
            })
        }
    }
}
