//! Error types for board links

use std::time::Duration;

use boardlink_core::{ConfigError, FrameError};
use boardlink_serial::SerialError;
use boardlink_toolchain::{BuildError, FlashError};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Why an engine stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reading or writing the transport failed
    Transport(String),
    /// The board sent something that cannot be trusted
    Protocol(String),
    /// The connection was closed on purpose
    Closed,
}

/// Board link errors
#[derive(Debug, Error)]
pub enum LinkError {
    /// Invalid pin, value or argument; nothing was sent
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A command could not be encoded; nothing was sent
    #[error("Cannot encode command: {0}")]
    Encode(#[from] FrameError),

    /// No endpoint matches the board profile
    #[error("No {board} board found")]
    NoDevice {
        /// Profile name
        board: String,
    },

    /// The endpoint is held by another connection
    #[error("{path} is already connected")]
    AlreadyConnected {
        /// Endpoint path
        path: String,
    },

    /// Opening the endpoint failed
    #[error("Cannot open board: {0}")]
    Open(#[from] SerialError),

    /// Flashing is needed but no firmware source was given
    #[error("{board} needs firmware but no firmware directory was given")]
    FirmwareRequired {
        /// Profile name
        board: String,
    },

    /// The board does not run compatible firmware
    #[error("{path} runs incompatible firmware ({})", version_note(.found))]
    IncompatibleFirmware {
        /// Endpoint path
        path: String,
        /// Version reported by the board
        found: Option<u16>,
    },

    /// Firmware build failed
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Firmware upload failed
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// The transport failed while connected
    #[error("Transport error: {0}")]
    Transport(String),

    /// The board broke the protocol; the connection is unusable
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No reply arrived in time
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Deadline that elapsed
        after: Duration,
    },

    /// The connection is not usable in its current state
    #[error("Board is {0}")]
    NotConnected(ConnectionState),

    /// The connection was closed
    #[error("Connection closed")]
    Closed,
}

fn version_note(found: &Option<u16>) -> String {
    match found {
        Some(v) => format!("protocol version {}", v),
        None => "no answer to version query".to_string(),
    }
}

impl From<Fault> for LinkError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Transport(msg) => Self::Transport(msg),
            Fault::Protocol(msg) => Self::Protocol(msg),
            Fault::Closed => Self::Closed,
        }
    }
}

impl LinkError {
    /// Whether trying the same thing again may succeed
    ///
    /// Configuration, toolchain and protocol failures need a change first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoDevice { .. }
            | Self::Transport(_)
            | Self::Timeout { .. }
            | Self::NotConnected(_) => true,
            Self::Open(e) => matches!(e, SerialError::NotFound(_) | SerialError::Busy(_)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_core::profile::Capability;

    #[test]
    fn test_retryable() {
        assert!(LinkError::NoDevice {
            board: "Arduino Uno".into()
        }
        .is_retryable());
        assert!(LinkError::Timeout {
            operation: "analog-read",
            after: Duration::from_secs(2)
        }
        .is_retryable());
        assert!(LinkError::Open(SerialError::Busy("/dev/ttyACM0".into())).is_retryable());
        assert!(!LinkError::Open(SerialError::PermissionDenied("/dev/ttyACM0".into())).is_retryable());
        assert!(!LinkError::Protocol("tag mismatch".into()).is_retryable());
        assert!(!LinkError::Config(ConfigError::MissingCapability {
            pin: "D2".into(),
            required: Capability::Pwm
        })
        .is_retryable());
    }

    #[test]
    fn test_messages() {
        let e = LinkError::Timeout {
            operation: "digital-read",
            after: Duration::from_millis(2000),
        };
        assert_eq!(e.to_string(), "digital-read timed out after 2000ms");
        let e = LinkError::IncompatibleFirmware {
            path: "/dev/ttyUSB0".into(),
            found: None,
        };
        assert_eq!(
            e.to_string(),
            "/dev/ttyUSB0 runs incompatible firmware (no answer to version query)"
        );
        assert_eq!(LinkError::from(Fault::Closed).to_string(), "Connection closed");
    }
}
