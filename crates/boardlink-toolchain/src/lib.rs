//! boardlink-toolchain - Build and flash board firmware
//!
//! Before the protocol engine can talk to a board, the board has to run
//! firmware that speaks the boardlink wire protocol. This crate turns a
//! generated sketch directory into such firmware and writes it to a board:
//!
//! - [`FirmwarePipeline`] is the build/flash interface used by connections
//! - [`ArduinoCli`] implements it by running `arduino-cli`
//! - [`WorkerPool`] bounds how many toolchain processes run at once
//!
//! Failures are reported with the tool's own output and are never retried.

pub mod arduino;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;

pub use arduino::ArduinoCli;
pub use config::ToolchainConfig;
pub use error::{BuildError, FlashError, ProcessFailure};
pub use pipeline::{Artifact, FirmwarePipeline, FlashAck};
pub use pool::WorkerPool;
