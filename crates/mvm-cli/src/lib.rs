//! `fleetingd` CLI: config loading, tracing init, and the in-process
//! `serve` harness that drives the provider façade over a stdin command
//! loop.

pub mod commands;
pub mod display;
pub mod logging;

pub use commands::{command, run};
