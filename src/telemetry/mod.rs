//! # Telemetry Module
//!
//! Publishes power controller state to local clients.
//!
//! This module handles:
//! - Parsing the line-based client vocabulary
//! - Serving clients over a Unix stream socket, one task per client
//! - Pushing battery data to idle clients
//! - Background polling with optional JSONL logging and file rotation
//! - Invoking the shutdown hook when the controller requests it

pub mod command;
pub mod logger;
pub mod monitor;
pub mod server;
pub mod session;
pub mod shutdown;

pub use command::ClientCommand;
pub use logger::TelemetryLogger;
pub use monitor::BatteryMonitor;
pub use server::TelemetryServer;
pub use session::SessionContext;
pub use shutdown::{CommandShutdownHook, ShutdownHook};
