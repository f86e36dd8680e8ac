//! Error types for the watchdog.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watchdog operations.
pub type Result<T> = std::result::Result<T, WatchdogError>;

/// Errors that can occur in the watchdog.
#[derive(Error, Debug)]
pub enum WatchdogError {
    /// The configuration file could not be read.
    #[error("cannot read configuration {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for our schema.
    #[error("invalid configuration.yaml: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration error.
    #[error("invalid configuration.yaml: {0}")]
    Config(String),

    /// Invalid exclude pattern.
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A millisecond value that is not a non-negative integer.
    #[error("invalid {key}: {value:?} is not a non-negative number of milliseconds")]
    InvalidMillis { key: &'static str, value: String },

    /// A sync script is missing from the configuration directory.
    #[error("script not found: {0}")]
    ScriptNotFound(PathBuf),

    /// The external sync script could not be started.
    #[error("cannot spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child was stopped because the watchdog is shutting down.
    #[error("interrupted: watchdog is shutting down")]
    Interrupted,

    /// The child ran to completion but reported failure.
    #[error("child exited unsuccessfully: {0}")]
    ChildFailed(std::process::ExitStatus),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
