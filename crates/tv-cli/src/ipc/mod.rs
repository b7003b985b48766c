//! IPC client for communicating with the service daemon
//!
//! Uses TCP on localhost. A connection carries both request responses and,
//! once subscribed, pushed telemetry events.

mod client;

pub use client::{is_unreachable, ServiceClient};

pub use tv_core::ipc::{default_ipc_address, DEFAULT_IPC_PORT};
