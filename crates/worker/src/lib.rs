//! Process wiring for the inbox worker binary
//!
//! - `config`: environment-driven [`AppConfig`]
//! - `telemetry`: tracing subscriber setup

pub mod config;
pub mod telemetry;

pub use config::{AppConfig, StorageBackend};
pub use telemetry::init_tracing;
