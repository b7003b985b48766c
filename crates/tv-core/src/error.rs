//! Core error types for tunnelvisor

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::ProfileId;

/// Top-level error type for the tunnelvisor ecosystem
#[derive(Error, Debug)]
pub enum TvError {
    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Profile store error
    #[error("Profile store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the supervised engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine executable could not be spawned
    #[error("Failed to launch engine {path:?}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation requires a running engine
    #[error("Engine is not running")]
    NotRunning,

    /// The engine's controller did not answer in time
    #[error("Engine did not become ready within {0:?}")]
    StartTimeout(Duration),

    /// The engine process exited while starting
    #[error("Engine exited during startup: {0}")]
    ExitedEarly(String),

    /// Transport failure talking to the controller
    #[error("Controller request failed: {0}")]
    Controller(String),

    /// The controller answered with a failure status
    #[error("Controller returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The controller answered with something we could not interpret
    #[error("Malformed controller response: {0}")]
    Malformed(String),

    /// Profile rejected by the engine
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// The engine implementation cannot perform this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Profile store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// No profile with this id
    #[error("Profile not found: {0}")]
    NotFound(ProfileId),

    /// Import source does not exist
    #[error("Profile source not found: {0}")]
    SourceNotFound(PathBuf),

    /// Invalid request
    #[error("Invalid profile request: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
