//! CLI command implementations
//!
//! Listing commands only need the profile database and the backend. The
//! `flash` module drives the firmware pipeline and the `io` module runs
//! peripheral operations over a connected `Board`.

pub mod flash;
pub mod io;
mod list;

pub use list::{list_backends, list_boards, list_ports};
