//! Process entry point wiring for stash: telemetry, configuration and the
//! HTTP surface that serves blob redirects.

pub mod server;
pub mod telemetry;
