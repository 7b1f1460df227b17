//! boardlink-serial - Byte transport to a board
//!
//! This crate provides the [`Transport`] abstraction used by the protocol
//! engine and its implementation over a local serial port:
//!
//! - [`SerialBackend`] enumerates endpoints and opens them
//! - [`SystemBackend`] is the backend for ports of the host OS
//! - [`SerialTransport`] writes from any task and delivers received bytes
//!   from a dedicated reader thread
//!
//! # Example
//!
//! ```no_run
//! use boardlink_core::profile::SerialParams;
//! use boardlink_serial::{ReadEvent, SerialBackend, SystemBackend};
//!
//! # async fn run() -> Result<(), boardlink_serial::SerialError> {
//! let backend = SystemBackend::new();
//! let mut opened = backend.open("/dev/ttyACM0", &SerialParams::default())?;
//! opened.transport.write(&[0x80, 0x01, 0x00, 0x0A])?;
//! if let Some(ReadEvent::Data(bytes)) = opened.reads.recv().await {
//!     println!("got {} bytes", bytes.len());
//! }
//! opened.transport.close();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod serial;
pub mod transport;

pub use error::{Result, SerialError};
pub use serial::{SerialTransport, SystemBackend};
pub use transport::{Opened, ReadEvent, ReadStream, SerialBackend, Transport};
