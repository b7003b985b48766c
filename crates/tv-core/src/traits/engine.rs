//! Engine trait

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;

use crate::error::EngineError;
use crate::event::{LogEvent, LogLevel};
use crate::types::{ProxySelection, ProxySnapshot, TrafficTotals, TunDevice};

/// Continuous stream of engine log lines
pub type LogStream = BoxStream<'static, Result<LogEvent, EngineError>>;

/// Opaque handle to the packet-routing engine
///
/// Implementations own the engine process and its control channel. The
/// supervisor serializes lifecycle calls (`start`, `stop`, `attach_tunnel`,
/// `load_profile`); query calls may arrive concurrently.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Launch the engine and wait until it accepts control requests
    async fn start(&self) -> Result<(), EngineError>;

    /// Terminate the engine (best effort)
    async fn stop(&self) -> Result<(), EngineError>;

    /// Whether the engine process is still alive
    fn is_running(&self) -> bool;

    /// Hand a tunnel device to the engine
    ///
    /// On success the engine owns the device. On failure the device has
    /// been dropped, which closes it.
    async fn attach_tunnel(&self, device: TunDevice) -> Result<(), EngineError>;

    /// Release the attached tunnel device, if any
    async fn detach_tunnel(&self) -> Result<(), EngineError>;

    /// Activate the profile at `path` and re-apply `selection`
    ///
    /// Returns the groups whose selection no longer applies, either because
    /// the group is gone or the chosen proxy is no longer one of its members.
    async fn load_profile(
        &self,
        path: &Path,
        selection: &ProxySelection,
    ) -> Result<Vec<String>, EngineError>;

    /// Snapshot of every proxy group
    async fn query_proxies(&self) -> Result<ProxySnapshot, EngineError>;

    /// Choose `proxy` for `group`
    async fn set_selected_proxy(&self, group: &str, proxy: &str) -> Result<(), EngineError>;

    /// Cumulative traffic counters since the engine started
    async fn query_traffic(&self) -> Result<TrafficTotals, EngineError>;

    /// Open a continuous log stream at or above `level`
    async fn open_log_stream(&self, level: LogLevel) -> Result<LogStream, EngineError>;
}
