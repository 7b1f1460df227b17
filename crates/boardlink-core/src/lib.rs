//! boardlink-core - Core types for talking to microcontroller boards
//!
//! This crate holds everything about a board link that does not need an
//! operating system: board profiles and their pin tables, the USB identity
//! matcher, and the wire frame codec shared by the host and the firmware.
//! It is `no_std` (with `alloc`) so the codec can be reused on the device side.
//!
//! # Features
//!
//! - `std` - Enable the RON profile database (`profile::ProfileDatabase`)
//!
//! # Example
//!
//! ```ignore
//! use boardlink_core::matcher::{match_endpoints, Endpoint};
//! use boardlink_core::profile::ProfileDatabase;
//!
//! let db = ProfileDatabase::builtin()?;
//! let uno = db.get("arduino-uno").unwrap();
//! let ports = [Endpoint::usb("/dev/ttyACM0", 0x2341, 0x0043)];
//! assert_eq!(match_endpoints(uno, &ports).len(), 1);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod matcher;
pub mod profile;
pub mod protocol;

pub use error::{ConfigError, FrameError};
pub use matcher::{match_endpoints, Endpoint};
pub use profile::{BoardProfile, Capability, Pin, PinCaps, PinSpec};
pub use protocol::{Command, Frame, FrameDecoder, ReplyShape, Value};
