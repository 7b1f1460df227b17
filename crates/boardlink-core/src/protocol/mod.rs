//! Wire protocol between host and board firmware
//!
//! Every unit on the wire is a frame:
//!
//! ```text
//! [opcode:1][tag:1][len:1][payload:len][0x0A]
//! ```
//!
//! Commands that expect an answer carry a non-zero correlation tag which the
//! firmware mirrors in its reply. Write-only commands carry tag 0 and are
//! never answered.

mod command;
mod frame;
pub mod opcodes;

pub use command::*;
pub use frame::*;
