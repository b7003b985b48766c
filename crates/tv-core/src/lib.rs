//! tv-core: Core abstractions and configuration for tunnelvisor
//!
//! This crate provides the shared domain types, telemetry events, error
//! types, collaborator traits (engine, profile store, notifier, observer)
//! and the IPC wire format used by the service daemon and the CLI.

pub mod config;
pub mod error;
pub mod event;
pub mod ipc;
pub mod traits;
pub mod types;

pub use error::{ConfigError, EngineError, StoreError, TvError};
pub use event::{ErrorKind, LogEvent, LogLevel, TelemetryEvent};
pub use types::{
    EventKind, KindSet, ObserverId, ProcessState, Profile, ProfileId, ProfileInfo, ProxyGroup,
    ProxySelection, ProxySnapshot, TrafficTotals, TunDevice, UNKNOWN_GROUP,
};
