//! Board profile types

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use super::pins::{Capability, PinSpec};
use crate::error::ConfigError;
use crate::protocol::opcodes;
use crate::protocol::ReplyShape;

/// Serial line parameters (parity is always none, no flow control)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: 57600,
            data_bits: 8,
            stop_bits: 1,
        }
    }
}

impl SerialParams {
    /// Check that the parameters can be applied to a serial port
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidProfile("baud rate must be non-zero".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::InvalidProfile(format!(
                "unsupported data bits: {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConfigError::InvalidProfile(format!(
                "unsupported stop bits: {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}N{}", self.baud_rate, self.data_bits, self.stop_bits)
    }
}

/// Which external toolchain builds firmware for the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardType {
    /// Built and uploaded with arduino-cli
    Arduino,
}

impl BoardType {
    /// Short name as used in profile files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arduino => "arduino",
        }
    }
}

/// Toolchain target of a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainTarget {
    /// Toolchain family
    pub board_type: BoardType,
    /// Fully-qualified board name (e.g. "arduino:avr:uno")
    pub fqbn: String,
    /// Upload speed override, appended to the FQBN for uploads
    pub upload_speed: Option<u32>,
}

impl ToolchainTarget {
    /// The FQBN to pass to the upload step
    pub fn upload_fqbn(&self) -> String {
        match self.upload_speed {
            Some(speed) => format!("{}:UploadSpeed={}", self.fqbn, speed),
            None => self.fqbn.clone(),
        }
    }
}

/// Argument of a board-specific extension operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A pin that must carry the capability; encoded as its wire byte
    Pin(Capability),
    /// Unsigned byte within `min..=max`
    Byte {
        /// Smallest accepted value
        min: u8,
        /// Largest accepted value
        max: u8,
    },
    /// Signed byte within `min..=max`, sent as two's complement
    Signed {
        /// Smallest accepted value
        min: i8,
        /// Largest accepted value
        max: i8,
    },
    /// 16-bit unsigned value, little-endian
    Word,
}

impl ArgKind {
    /// Validate one textual argument and append its encoding to `out`
    pub fn encode(&self, pins: &PinSpec, arg: &str, out: &mut Vec<u8>) -> Result<(), ConfigError> {
        match *self {
            Self::Pin(cap) => {
                out.push(pins.resolve(arg, cap)?.wire);
            }
            Self::Byte { min, max } => {
                let v = parse_int(arg)?;
                check_range("argument", v, min as i64, max as i64)?;
                out.push(v as u8);
            }
            Self::Signed { min, max } => {
                let v = parse_int(arg)?;
                check_range("argument", v, min as i64, max as i64)?;
                out.push(v as i8 as u8);
            }
            Self::Word => {
                let v = parse_int(arg)?;
                check_range("argument", v, 0, u16::MAX as i64)?;
                out.extend_from_slice(&(v as u16).to_le_bytes());
            }
        }
        Ok(())
    }
}

/// Parse a decimal integer argument
pub fn parse_int(arg: &str) -> Result<i64, ConfigError> {
    arg.trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::InvalidArgument {
            what: "number",
            value: arg.to_string(),
        })
}

/// Reject `value` unless it lies in `min..=max`
pub fn check_range(what: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::ValueOutOfRange {
            what,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// A board-specific compound operation layered on the common framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOp {
    /// Operation name used by callers
    pub name: String,
    /// Opcode in the extension range
    pub opcode: u8,
    /// Reply the firmware sends back
    pub reply: ReplyShape,
    /// Argument kinds in wire order
    pub args: Vec<ArgKind>,
    /// Human readable description
    pub description: String,
}

impl ExtensionOp {
    /// Validate arguments and build the frame payload
    pub fn encode_args(&self, pins: &PinSpec, args: &[&str]) -> Result<Vec<u8>, ConfigError> {
        if args.len() != self.args.len() {
            return Err(ConfigError::ArgumentCount {
                name: self.name.clone(),
                expected: self.args.len(),
                got: args.len(),
            });
        }
        let mut payload = Vec::with_capacity(args.len() * 2);
        for (kind, arg) in self.args.iter().zip(args) {
            kind.encode(pins, arg, &mut payload)?;
        }
        Ok(payload)
    }
}

/// Static description of one supported board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardProfile {
    /// Short identifier (e.g. "arduino-uno")
    pub id: String,
    /// Display name
    pub name: String,
    /// USB identity patterns, in priority order
    pub identities: Vec<String>,
    /// Serial line parameters
    pub serial: SerialParams,
    /// Toolchain target
    pub toolchain: ToolchainTarget,
    /// Pin table
    pub pins: PinSpec,
    /// ADC resolution in bits
    pub adc_bits: u8,
    /// Persistent memory (EEPROM) size in bytes
    pub memory_size: u16,
    /// Largest accepted servo angle in degrees
    pub servo_max_angle: u8,
    /// Board-specific operations
    pub extensions: Vec<ExtensionOp>,
}

impl BoardProfile {
    /// Largest value an analog read can return
    pub fn adc_max(&self) -> u16 {
        if self.adc_bits >= 16 {
            u16::MAX
        } else {
            (1u16 << self.adc_bits) - 1
        }
    }

    /// Look up an extension operation by name
    pub fn extension(&self, name: &str) -> Option<&ExtensionOp> {
        self.extensions.iter().find(|e| e.name == name)
    }

    /// Look up an extension operation by opcode
    pub fn extension_by_opcode(&self, opcode: u8) -> Option<&ExtensionOp> {
        self.extensions.iter().find(|e| e.opcode == opcode)
    }

    /// Check the profile for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::InvalidProfile("empty board id".into()));
        }
        if self.identities.is_empty() {
            return Err(ConfigError::InvalidProfile(format!(
                "{}: no USB identity patterns",
                self.id
            )));
        }
        self.serial.validate()?;
        if self.toolchain.fqbn.split(':').count() < 3 {
            return Err(ConfigError::InvalidProfile(format!(
                "{}: FQBN '{}' must be vendor:arch:board",
                self.id, self.toolchain.fqbn
            )));
        }
        if self.adc_bits == 0 || self.adc_bits > 16 {
            return Err(ConfigError::InvalidProfile(format!(
                "{}: ADC resolution of {} bits",
                self.id, self.adc_bits
            )));
        }
        for (i, ext) in self.extensions.iter().enumerate() {
            if !opcodes::is_extension(ext.opcode) {
                return Err(ConfigError::InvalidProfile(format!(
                    "{}: extension '{}' uses opcode 0x{:02X} outside 0x{:02X}..=0x{:02X}",
                    self.id,
                    ext.name,
                    ext.opcode,
                    opcodes::EXT_FIRST,
                    opcodes::EXT_LAST
                )));
            }
            let clash = self.extensions[..i]
                .iter()
                .any(|e| e.opcode == ext.opcode || e.name == ext.name);
            if clash {
                return Err(ConfigError::InvalidProfile(format!(
                    "{}: extension '{}' reuses a name or opcode",
                    self.id, ext.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::PinCaps;
    use alloc::vec;

    fn pins() -> PinSpec {
        let mut pins = PinSpec::new();
        pins.add("D2", "2", PinCaps::DIGITAL).unwrap();
        pins
    }

    #[test]
    fn test_upload_fqbn() {
        let mut target = ToolchainTarget {
            board_type: BoardType::Arduino,
            fqbn: "esp32:esp32:esp32".into(),
            upload_speed: Some(921600),
        };
        assert_eq!(target.upload_fqbn(), "esp32:esp32:esp32:UploadSpeed=921600");
        target.upload_speed = None;
        assert_eq!(target.upload_fqbn(), "esp32:esp32:esp32");
    }

    #[test]
    fn test_serial_params_validate() {
        assert!(SerialParams::default().validate().is_ok());
        let bad = SerialParams {
            data_bits: 9,
            ..SerialParams::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_extension_encoding() {
        let op = ExtensionOp {
            name: "motors".into(),
            opcode: 0xC0,
            reply: ReplyShape::None,
            args: vec![
                ArgKind::Pin(Capability::Digital),
                ArgKind::Signed { min: -100, max: 100 },
                ArgKind::Word,
            ],
            description: String::new(),
        };
        let payload = op.encode_args(&pins(), &["D2", "-50", "1000"]).unwrap();
        assert_eq!(payload, vec![2, 0xCE, 0xE8, 0x03]);

        assert!(matches!(
            op.encode_args(&pins(), &["D2", "-101", "0"]),
            Err(ConfigError::ValueOutOfRange { value: -101, .. })
        ));
        assert!(matches!(
            op.encode_args(&pins(), &["D2"]),
            Err(ConfigError::ArgumentCount {
                expected: 3,
                got: 1,
                ..
            })
        ));
        assert!(matches!(
            op.encode_args(&pins(), &["D2", "fast", "0"]),
            Err(ConfigError::InvalidArgument { .. })
        ));
    }
}
