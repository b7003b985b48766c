//! IPC server for CLI communication
//!
//! Provides a localhost TCP server that the CLI uses to drive the running
//! service daemon and to subscribe to its telemetry.

mod server;

pub use server::IpcServer;
