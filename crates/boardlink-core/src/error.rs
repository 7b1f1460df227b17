//! Error types for boardlink-core
//!
//! Both types are `no_std` compatible and carry enough context to be shown
//! to the person who wrote the block program.

use alloc::string::String;
use core::fmt;

use crate::profile::Capability;

/// A caller or profile mistake that is detected before anything is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Pin is not declared by the board profile
    UnknownPin {
        /// Pin as given by the caller
        pin: String,
    },
    /// Pin exists but cannot be used for the requested operation
    MissingCapability {
        /// Pin as given by the caller
        pin: String,
        /// Capability the operation needs
        required: Capability,
    },
    /// Numeric argument outside the range accepted by the operation
    ValueOutOfRange {
        /// Which argument was rejected
        what: &'static str,
        /// Rejected value
        value: i64,
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// Persistent memory address beyond the board's memory size
    AddressOutOfRange {
        /// Requested address
        address: u32,
        /// Memory size of the board in bytes
        size: u16,
    },
    /// Argument text could not be parsed
    InvalidArgument {
        /// Which argument was rejected
        what: &'static str,
        /// Rejected text
        value: String,
    },
    /// The profile has no extension operation with this name
    UnknownExtension {
        /// Requested extension name
        name: String,
    },
    /// Wrong number of arguments for an extension operation
    ArgumentCount {
        /// Extension name
        name: String,
        /// Number of arguments the extension takes
        expected: usize,
        /// Number of arguments supplied
        got: usize,
    },
    /// The profile definition itself is inconsistent
    InvalidProfile(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPin { pin } => write!(f, "pin '{}' is not defined for this board", pin),
            Self::MissingCapability { pin, required } => {
                write!(f, "pin '{}' does not support {} operations", pin, required)
            }
            Self::ValueOutOfRange {
                what,
                value,
                min,
                max,
            } => write!(f, "{} {} is out of range ({}..={})", what, value, min, max),
            Self::AddressOutOfRange { address, size } => write!(
                f,
                "memory address {} is out of range (board has {} bytes)",
                address, size
            ),
            Self::InvalidArgument { what, value } => write!(f, "invalid {}: '{}'", what, value),
            Self::UnknownExtension { name } => {
                write!(f, "operation '{}' is not available on this board", name)
            }
            Self::ArgumentCount {
                name,
                expected,
                got,
            } => write!(
                f,
                "operation '{}' takes {} argument(s), got {}",
                name, expected, got
            ),
            Self::InvalidProfile(msg) => write!(f, "invalid board profile: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Wire framing and payload errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload does not fit the one-byte length field
    PayloadTooLong {
        /// Attempted payload length
        len: usize,
    },
    /// Opcode is not part of the protocol
    UnknownOpcode(u8),
    /// Payload length does not fit the opcode
    BadPayload {
        /// Opcode of the offending frame
        opcode: u8,
        /// Expected payload description
        expected: &'static str,
        /// Actual payload length
        len: usize,
    },
    /// Payload byte has a value the opcode does not define
    BadValue {
        /// Opcode of the offending frame
        opcode: u8,
        /// Offending byte
        value: u8,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLong { len } => {
                write!(f, "payload of {} bytes exceeds the 255 byte frame limit", len)
            }
            Self::UnknownOpcode(op) => write!(f, "unknown opcode 0x{:02X}", op),
            Self::BadPayload {
                opcode,
                expected,
                len,
            } => write!(
                f,
                "opcode 0x{:02X}: expected {}, got {} byte(s)",
                opcode, expected, len
            ),
            Self::BadValue { opcode, value } => {
                write!(f, "opcode 0x{:02X}: invalid value 0x{:02X}", opcode, value)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}
