//! Configuration for the reindex supervisor.
//!
//! The configuration is a TOML document loaded once at startup. `${VAR}` and
//! `${VAR:-default}` placeholders are resolved against the environment in
//! the raw text before deserialization, and the result is validated before
//! anything else runs.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use codex_directory_watcher::FilterConfig;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default port of the health interface.
pub const DEFAULT_HEALTH_PORT: u16 = 9100;

const ENV_PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Quiet period after the last change before a reindex fires (seconds).
    pub debounce_seconds: f64,

    /// File extensions that trigger a reindex.
    pub watch_extensions: Vec<String>,

    /// Path substrings that never trigger a reindex.
    pub ignore_patterns: Vec<String>,

    /// Exact file names that never trigger a reindex.
    pub ignore_files: Vec<String>,

    /// Consecutive failures after which automatic attempts stop.
    pub max_consecutive_failures: u32,

    /// Backoff floor (seconds).
    pub min_retry_delay_seconds: u64,

    /// Backoff ceiling (seconds).
    pub max_retry_delay_seconds: u64,

    /// Reduce log output to warnings and demote per-change lines.
    pub quiet: bool,

    /// Root directories to watch.
    pub watch_dirs: Vec<PathBuf>,

    /// Location of the vector store. Always ignored by the watcher.
    pub vector_store_path: Option<PathBuf>,

    /// Run one sync as soon as the supervisor starts.
    pub sync_on_start: bool,

    /// Health interface settings.
    pub health: HealthServerConfig,

    /// Polling monitor settings.
    pub poll: PollConfig,
}

impl SupervisorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, resolve and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate a configuration document, resolving placeholders
    /// against the process environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::from_toml_str_with(raw, |name| std::env::var(name).ok())
    }

    /// Parse and validate a configuration document, resolving placeholders
    /// with `lookup`.
    pub fn from_toml_str_with<F>(raw: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolved = substitute_env(raw, lookup)?;
        let config: Self = toml::from_str(&resolved)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants between fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.debounce()?;
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.min_retry_delay_seconds == 0 {
            return Err(ConfigError::Invalid(
                "min_retry_delay_seconds must be at least 1".to_string(),
            ));
        }
        if self.min_retry_delay_seconds > self.max_retry_delay_seconds {
            return Err(ConfigError::Invalid(format!(
                "min_retry_delay_seconds ({}) exceeds max_retry_delay_seconds ({})",
                self.min_retry_delay_seconds, self.max_retry_delay_seconds
            )));
        }
        if self
            .watch_extensions
            .iter()
            .all(|ext| ext.trim().trim_start_matches('.').is_empty())
        {
            return Err(ConfigError::Invalid(
                "watch_extensions must name at least one extension".to_string(),
            ));
        }
        if self.poll.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "poll.interval_seconds must be at least 1".to_string(),
            ));
        }
        self.health.socket_addr()?;
        Ok(())
    }

    /// Debounce interval. Fails unless `debounce_seconds` is a positive
    /// number of seconds that fits a [`Duration`] without rounding to zero.
    pub fn debounce(&self) -> Result<Duration, ConfigError> {
        match Duration::try_from_secs_f64(self.debounce_seconds) {
            Ok(debounce) if !debounce.is_zero() => Ok(debounce),
            _ => Err(ConfigError::Invalid(format!(
                "debounce_seconds must be a positive duration, got {}",
                self.debounce_seconds
            ))),
        }
    }

    /// Backoff floor.
    pub fn min_retry_delay(&self) -> Duration {
        Duration::from_secs(self.min_retry_delay_seconds)
    }

    /// Backoff ceiling.
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_seconds)
    }

    /// Build the watcher's path filter. The vector store path is appended to
    /// the ignore list so the indexer's own writes never retrigger it.
    pub fn filter_config(&self) -> FilterConfig {
        let mut filter = FilterConfig::new();
        for root in &self.watch_dirs {
            filter = filter.with_root(root.clone());
        }
        for ext in &self.watch_extensions {
            filter = filter.with_extension(ext);
        }
        for pattern in &self.ignore_patterns {
            filter = filter.ignore_pattern(pattern.clone());
        }
        for name in &self.ignore_files {
            filter = filter.ignore_file(name.clone());
        }
        if let Some(store) = &self.vector_store_path {
            filter = filter.ignore_pattern(store.to_string_lossy().into_owned());
        }
        filter
    }

    /// Add a directory to watch.
    pub fn with_watch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watch_dirs.push(dir.into());
        self
    }

    /// Set the debounce interval in seconds.
    pub fn with_debounce_seconds(mut self, seconds: f64) -> Self {
        self.debounce_seconds = seconds;
        self
    }

    /// Set the failure ceiling.
    pub fn with_max_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Set the backoff bounds in seconds.
    pub fn with_retry_delays(mut self, min_seconds: u64, max_seconds: u64) -> Self {
        self.min_retry_delay_seconds = min_seconds;
        self.max_retry_delay_seconds = max_seconds;
        self
    }

    /// Set the vector store location.
    pub fn with_vector_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.vector_store_path = Some(path.into());
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            debounce_seconds: 5.0,
            watch_extensions: vec!["md".to_string(), "yaml".to_string(), "yml".to_string()],
            ignore_patterns: vec![
                "__pycache__".to_string(),
                "node_modules".to_string(),
                ".git".to_string(),
            ],
            ignore_files: Vec::new(),
            max_consecutive_failures: 5,
            min_retry_delay_seconds: 60,
            max_retry_delay_seconds: 3600,
            quiet: false,
            watch_dirs: Vec::new(),
            vector_store_path: None,
            sync_on_start: false,
            health: HealthServerConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

/// Configuration of the health HTTP interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthServerConfig {
    /// Whether to serve the health interface at all.
    pub enabled: bool,

    /// Bind address. Loopback unless deliberately exposed.
    pub host: String,

    /// Bind port.
    pub port: u16,
}

impl HealthServerConfig {
    /// Resolve the bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip = host.parse().map_err(|_| {
            ConfigError::Invalid(format!("health.host is not an IP address: {}", self.host))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_HEALTH_PORT,
        }
    }
}

/// Configuration of the polling monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Seconds between change checks.
    pub interval_seconds: u64,

    /// What to do when a change is detected.
    pub mode: PollMode,

    /// Ask the engine for a full rebuild instead of an incremental sync.
    pub full_reindex: bool,
}

impl PollConfig {
    /// Interval between change checks.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            mode: PollMode::Continuous,
            full_reindex: false,
        }
    }
}

/// How the polling monitor runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Check and sync forever.
    #[default]
    Continuous,

    /// Check and sync once, then return.
    Once,

    /// Check once and report what would be synced without syncing.
    DryRun,
}

/// Replace `${VAR}` and `${VAR:-default}` placeholders in `raw`.
pub fn substitute_env<F>(raw: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = Regex::new(ENV_PLACEHOLDER)
        .map_err(|e| ConfigError::Invalid(format!("placeholder pattern: {e}")))?;

    let mut resolved = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in pattern.captures_iter(raw) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        resolved.push_str(&raw[last..whole.start()]);
        let value = match (lookup(name.as_str()), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => return Err(ConfigError::MissingEnvVar(name.as_str().to_string())),
        };
        resolved.push_str(&value);
        last = whole.end();
    }
    resolved.push_str(&raw[last..]);
    Ok(resolved)
}
