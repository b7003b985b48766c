//! tunnelvisor: command-line client for the service daemon
//!
//! Talks to `tunnelvisord` over its localhost IPC socket to drive the
//! engine lifecycle, inspect and select proxies, manage profiles and
//! watch the telemetry stream.

pub mod commands;
pub mod ipc;
pub mod output;
