//! tv-service: Supervision of the tunnel/routing engine
//!
//! The service owns the engine process, fans its telemetry out to
//! observers, reloads profiles into it, and exposes all of this to the CLI
//! over the localhost IPC server.

pub mod engine;
pub mod events;
pub mod ipc;
pub mod notify;
pub mod policy;
pub mod profile;
pub mod service;
pub mod supervisor;

pub use service::{EventChannel, ProfileChannel, ServiceOptions, Subscription, TunnelService};
pub use supervisor::{ProcessSupervisor, SupervisorConfig};
