//! Board profiles
//!
//! A profile describes one supported board: how to recognise it on USB, how
//! to talk to it on the serial line, how to build firmware for it, which
//! pins it exposes and which board-specific operations it adds.

mod pins;
mod types;

#[cfg(feature = "std")]
mod database;

pub use pins::*;
pub use types::*;

#[cfg(feature = "std")]
pub use database::*;
