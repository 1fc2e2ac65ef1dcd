//! Error types for the reindex supervisor.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that can occur while setting up or running the supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Directory watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] codex_directory_watcher::WatcherError),

    /// No tokio runtime to schedule timers on.
    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Errors raised while loading and validating configuration.
///
/// Any of these is fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML or has mistyped fields.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `${VAR}` placeholder names an unset variable and has no default.
    #[error("environment variable {0} is not set")]
    MissingEnvVar(String),

    /// A value is out of its allowed range.
    #[error("invalid value: {0}")]
    Invalid(String),
}
