//! Error types for serial transports

use thiserror::Error;

/// Serial transport errors
///
/// The first group is returned by `open` and is terminal for that attempt.
/// [`SerialError::Io`] and [`SerialError::Closed`] happen on an open port.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The OS refused access to the port
    #[error("Permission denied opening {0}")]
    PermissionDenied(String),

    /// The port does not exist (never did, or was unplugged)
    #[error("Serial port {0} not found")]
    NotFound(String),

    /// Another process holds the port
    #[error("Serial port {0} is busy")]
    Busy(String),

    /// Any other failure while opening
    #[error("Failed to open {path}: {source}")]
    Open {
        /// Port path
        path: String,
        /// Underlying error
        #[source]
        source: serialport::Error,
    },

    /// Listing the ports of the system failed
    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(String),

    /// Read or write failure on an open port
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was closed
    #[error("Transport closed")]
    Closed,
}

/// Result type for serial operations
pub type Result<T> = std::result::Result<T, SerialError>;

impl SerialError {
    /// Classify an error returned while opening `path`
    pub fn from_open(path: &str, e: serialport::Error) -> Self {
        use serialport::ErrorKind;
        use std::io::ErrorKind as IoKind;

        match e.kind() {
            ErrorKind::Io(IoKind::PermissionDenied) => Self::PermissionDenied(path.into()),
            ErrorKind::NoDevice | ErrorKind::Io(IoKind::NotFound) => Self::NotFound(path.into()),
            _ if e.description.to_ascii_lowercase().contains("busy") => Self::Busy(path.into()),
            _ => Self::Open {
                path: path.into(),
                source: e,
            },
        }
    }

    /// Whether the error happened while opening the port
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::NotFound(_) | Self::Busy(_) | Self::Open { .. }
        )
    }
}
