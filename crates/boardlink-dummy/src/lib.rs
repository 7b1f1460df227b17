//! boardlink-dummy - Simulated boards for testing
//!
//! This crate emulates a board running boardlink firmware entirely in
//! memory. It's useful for testing and development without real hardware.
//!
//! - [`DummyDevice`] is one simulated board; tests use it to set inputs,
//!   inspect outputs and misbehave on purpose (hold or drop replies, inject
//!   bytes, unplug)
//! - [`DummyBackend`] exposes simulated boards as serial endpoints
//! - [`DummyPipeline`] "flashes" compatible firmware onto a simulated board

mod backend;
mod device;
mod pipeline;

pub use backend::{DummyBackend, DummyTransport};
pub use device::{DummyConfig, DummyDevice};
pub use pipeline::DummyPipeline;
