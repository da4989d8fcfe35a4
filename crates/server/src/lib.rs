//! HTTP surface for the shrinkwrap transformation engine.
//!
//! The binary in `main.rs` wires configuration, stores and the engine
//! together; this library exposes the router and state so tests can drive
//! the API in-process.

pub mod api;
pub mod metrics;
pub mod state;
