//! Telemetry events delivered to observers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{EventKind, ProcessState};

/// Typed failure reported through the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Engine launch or tunnel attach failed
    StartFailure,
    /// Writing a proxy selection failed
    SetProxySelected,
    /// Reading proxies or telemetry from the engine failed
    QueryProxyFailure,
    /// Parsing or applying a profile failed
    ProfileLoadFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StartFailure => write!(f, "start failure"),
            ErrorKind::SetProxySelected => write!(f, "set proxy failure"),
            ErrorKind::QueryProxyFailure => write!(f, "query proxy failure"),
            ErrorKind::ProfileLoadFailure => write!(f, "profile load failure"),
        }
    }
}

/// Engine log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Silent,
}

impl LogLevel {
    /// Name used by the engine's controller API
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    /// Parse an engine-reported level, treating unknown names as info
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "silent" => LogLevel::Silent,
            _ => LogLevel::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single engine log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub payload: String,
}

/// Event pushed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Throughput in bytes per second
    Speed { up: u64, down: u64 },
    /// Cumulative bytes transferred since the engine started
    Bandwidth { total: u64 },
    /// Engine log line
    Log(LogEvent),
    /// Engine lifecycle transition
    Process { state: ProcessState },
    /// The stored profiles changed
    ProfileChanged,
    /// A failure caught at the service boundary
    Error { kind: ErrorKind, message: String },
}

impl TelemetryEvent {
    /// The kind observers subscribe to for this event
    pub fn kind(&self) -> EventKind {
        match self {
            TelemetryEvent::Speed { .. } => EventKind::Speed,
            TelemetryEvent::Bandwidth { .. } => EventKind::Bandwidth,
            TelemetryEvent::Log(_) => EventKind::Log,
            TelemetryEvent::Process { .. } => EventKind::Process,
            TelemetryEvent::ProfileChanged => EventKind::ProfileChanged,
            TelemetryEvent::Error { .. } => EventKind::Error,
        }
    }

    /// Zero reading published when the engine stops
    pub fn zero_speed() -> Self {
        TelemetryEvent::Speed { up: 0, down: 0 }
    }

    /// Zero reading published when the engine stops
    pub fn zero_bandwidth() -> Self {
        TelemetryEvent::Bandwidth { total: 0 }
    }

    pub fn error(kind: ErrorKind, message: impl fmt::Display) -> Self {
        TelemetryEvent::Error {
            kind,
            message: message.to_string(),
        }
    }
}
