//! Runtime glue that wires configs, buffering hooks, the buffered height
//! fence, fatal error handling, telemetry, and runner orchestration.

pub mod config;
pub mod fatal;
pub mod hooks;
pub mod progress;
pub mod protocol;
pub mod runner;
pub mod telemetry;
