//! Service daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::event::LogLevel;
use crate::ipc::DEFAULT_IPC_PORT;
use crate::types::{EventKind, KindSet};

/// Configuration for the service daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// IPC port for CLI communication (localhost only)
    pub ipc_port: u16,

    /// Profile database file
    pub profiles_path: PathBuf,

    /// Directory imported profiles are copied into
    pub profile_cache_dir: PathBuf,

    /// Start the engine as soon as the daemon is up
    pub autostart: bool,

    /// Engine process and controller settings
    pub engine: EngineConfig,

    /// Telemetry pull settings
    pub telemetry: TelemetryConfig,

    /// Interest sets of the notification observer
    pub foreground: ForegroundConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            ipc_port: DEFAULT_IPC_PORT,
            profiles_path: config_dir.join("profiles.toml"),
            profile_cache_dir: config_dir.join("profiles"),
            autostart: false,
            engine: EngineConfig::default(),
            telemetry: TelemetryConfig::default(),
            foreground: ForegroundConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }
}

/// How to launch and reach the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable
    pub executable: PathBuf,

    /// Extra arguments appended after the generated ones
    pub args: Vec<String>,

    /// Engine home directory (passed as `-d`)
    pub working_dir: PathBuf,

    /// External controller address (passed as `-ext-ctl`)
    pub controller_address: String,

    /// Controller secret (passed as `-secret`, sent as bearer token)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// How long to wait for the controller after spawning
    #[serde(with = "duration_secs")]
    pub start_timeout: Duration,

    /// How long to wait for the process to exit after killing it
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,

    /// How often the supervisor checks that the engine is still alive
    #[serde(with = "duration_millis")]
    pub liveness_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("clash"),
            args: Vec::new(),
            working_dir: super::default_config_dir().join("engine"),
            controller_address: "127.0.0.1:9090".to_string(),
            secret: None,
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            liveness_interval: Duration::from_millis(1000),
        }
    }
}

/// Telemetry pull loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Speed poll interval
    #[serde(with = "duration_millis")]
    pub speed_interval: Duration,

    /// Bandwidth poll interval
    #[serde(with = "duration_millis")]
    pub bandwidth_interval: Duration,

    /// Minimum engine log level streamed to observers
    pub log_level: LogLevel,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            speed_interval: Duration::from_millis(1000),
            bandwidth_interval: Duration::from_millis(1000),
            log_level: LogLevel::Info,
        }
    }
}

/// Interest sets applied to the notification observer on foreground changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForegroundConfig {
    /// Kinds wanted while the host is in the foreground
    pub foreground: KindSet,

    /// Kinds wanted while the host is in the background
    pub background: KindSet,
}

impl Default for ForegroundConfig {
    fn default() -> Self {
        Self {
            foreground: KindSet::telemetry(),
            background: KindSet::from([EventKind::Speed]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            ipc_port = 23000

            [engine]
            executable = "/usr/local/bin/clash"

            [telemetry]
            speed_interval = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.ipc_port, 23000);
        assert_eq!(config.engine.executable, PathBuf::from("/usr/local/bin/clash"));
        assert_eq!(config.engine.controller_address, "127.0.0.1:9090");
        assert_eq!(config.telemetry.speed_interval, Duration::from_millis(500));
        assert_eq!(config.telemetry.bandwidth_interval, Duration::from_millis(1000));
        assert_eq!(config.foreground.background, KindSet::from([EventKind::Speed]));
    }

    #[test]
    fn test_foreground_sets_parse_from_names() {
        let config: ForegroundConfig = toml::from_str(
            r#"
            foreground = ["speed", "log"]
            background = []
            "#,
        )
        .unwrap();

        assert!(config.foreground.contains(EventKind::Log));
        assert!(!config.foreground.contains(EventKind::Bandwidth));
        assert!(config.background.is_empty());
    }

    #[test]
    fn test_ipc_address() {
        let config = ServiceConfig::default();
        assert_eq!(config.ipc_address(), format!("127.0.0.1:{}", DEFAULT_IPC_PORT));
    }
}
