//! boardlink-link - Live connections to boards
//!
//! This crate ties the other boardlink crates together:
//!
//! - [`LinkManager`] discovers boards, flashes firmware when needed and hands
//!   out connections, never two for the same endpoint
//! - [`Board`] is the peripheral driver of one connected board
//! - [`Engine`] is the command protocol engine under each connection: it
//!   correlates replies, serialises requests and enforces reply deadlines
//! - [`LinkConfig`] holds timeouts, reconnect backoff and toolchain settings
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use boardlink_core::profile::ProfileDatabase;
//! use boardlink_core::protocol::Level;
//! use boardlink_link::{ConnectOptions, LinkConfig, LinkManager};
//! use boardlink_serial::SystemBackend;
//! use boardlink_toolchain::ArduinoCli;
//!
//! let db = ProfileDatabase::builtin()?;
//! let config = LinkConfig::default();
//! let manager = LinkManager::new(
//!     Arc::new(SystemBackend::new()),
//!     Arc::new(ArduinoCli::new(config.toolchain.clone())),
//!     config,
//! );
//! let board = manager
//!     .connect(db.get("arduino-uno").unwrap(), ConnectOptions::default())
//!     .await?;
//! board.set_digital_output("D13", Level::High).await?;
//! println!("A0 = {}", board.read_analog_pin("A0").await?);
//! ```

pub mod board;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod manager;
pub mod reconnect;

pub use board::Board;
pub use config::{ConfigFileError, LinkConfig, ReconnectConfig};
pub use connection::{ConnectOptions, Connection, ConnectionState, FlashPolicy, LinkEvent};
pub use engine::{Engine, EngineStatus};
pub use error::{Fault, LinkError};
pub use manager::LinkManager;
pub use reconnect::ReconnectPolicy;
