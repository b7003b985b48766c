//! Telemetry event fan-out
//!
//! - [`ObserverRegistry`]: observers, their interests, ordered dispatch
//! - [`TelemetryPuller`]: per-kind pull loops against the engine
//! - [`EventMultiplexer`]: starts and stops loops as interests change

mod multiplexer;
mod puller;
mod registry;

pub use multiplexer::EventMultiplexer;
pub use puller::{PullerConfig, TelemetryPuller};
pub use registry::ObserverRegistry;
