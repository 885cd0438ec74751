//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Backoff and deadline settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-invocation behavior
    #[serde(default)]
    pub run: RunConfig,

    /// Archive layout on disk
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            log::warn!("Config load failed from {:?}: {}. Using defaults.", path, e);
            Self::default()
        })
    }

    /// Override values from environment-style lookups.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(env::STORAGE_ROOT) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(endpoint) = lookup(env::ENDPOINT) {
            self.api.endpoint = endpoint;
        }
        if let Some(value) = lookup(env::MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_env(env::MAX_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(env::BASE_DELAY_MS) {
            self.retry.base_delay_ms = parse_env(env::BASE_DELAY_MS, &value)?;
        }
        if let Some(value) = lookup(env::TIMEOUT_SECS) {
            self.api.timeout_secs = parse_env(env::TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(env::DEADLINE_SECS) {
            self.retry.deadline_secs = parse_env(env::DEADLINE_SECS, &value)?;
        }
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.api.user_agent.trim().is_empty() {
            return Err(AppError::validation("api.user_agent is empty"));
        }
        let endpoint = url::Url::parse(&self.api.endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AppError::validation(format!(
                "api.endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AppError::validation(
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ));
        }
        if self.retry.deadline_secs == 0 {
            return Err(AppError::validation("retry.deadline_secs must be > 0"));
        }
        if self.run.requests_per_run == 0 {
            return Err(AppError::validation("run.requests_per_run must be > 0"));
        }
        if self.storage.data_dir == self.storage.dictionary_dir {
            return Err(AppError::validation(
                "storage.data_dir and storage.dictionary_dir must differ",
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("{key}={value:?}: {e}")))
}

/// Environment variable names recognised by [`Config::apply_env_with`].
pub mod env {
    pub const STORAGE_ROOT: &str = "ARCHIVER_STORAGE_ROOT";
    pub const ENDPOINT: &str = "ARCHIVER_ENDPOINT";
    pub const MAX_ATTEMPTS: &str = "ARCHIVER_MAX_ATTEMPTS";
    pub const BASE_DELAY_MS: &str = "ARCHIVER_BASE_DELAY_MS";
    pub const TIMEOUT_SECS: &str = "ARCHIVER_TIMEOUT_SECS";
    pub const DEADLINE_SECS: &str = "ARCHIVER_DEADLINE_SECS";
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Random-definition endpoint
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-attempt request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Retry and deadline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per fetch, including the first
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, doubled afterwards
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Cap on a single backoff delay
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,

    /// Overall deadline for the fetch phase of a run
    #[serde(default = "defaults::deadline")]
    pub deadline_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
            deadline_secs: defaults::deadline(),
        }
    }
}

/// Per-invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Fetch rounds per invocation
    #[serde(default = "defaults::requests_per_run")]
    pub requests_per_run: usize,

    /// Pause between fetch rounds in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            requests_per_run: defaults::requests_per_run(),
            request_delay_ms: defaults::request_delay(),
        }
    }
}

/// On-disk archive layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the archive
    #[serde(default = "defaults::root")]
    pub root: PathBuf,

    /// Daily dumps, relative to root
    #[serde(default = "defaults::data_dir")]
    pub data_dir: String,

    /// Alphabetical dictionary, relative to root
    #[serde(default = "defaults::dictionary_dir")]
    pub dictionary_dir: String,

    /// Seen-id sidecar, relative to root
    #[serde(default = "defaults::index_file")]
    pub index_file: String,

    /// Advisory lock file, relative to root
    #[serde(default = "defaults::lock_file")]
    pub lock_file: String,
}

impl StorageConfig {
    /// Storage config rooted at `root` with default file names.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Absolute path of the lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.lock_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: defaults::root(),
            data_dir: defaults::data_dir(),
            dictionary_dir: defaults::dictionary_dir(),
            index_file: defaults::index_file(),
            lock_file: defaults::lock_file(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // API defaults
    pub fn endpoint() -> String {
        "https://api.urbandictionary.com/v0/random".into()
    }
    pub fn user_agent() -> String {
        concat!("archiver/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        10
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay() -> u64 {
        1000
    }
    pub fn max_delay() -> u64 {
        30_000
    }
    pub fn deadline() -> u64 {
        120
    }

    // Run defaults
    pub fn requests_per_run() -> usize {
        1
    }
    pub fn request_delay() -> u64 {
        500
    }

    // Storage defaults
    pub fn root() -> PathBuf {
        PathBuf::from(".")
    }
    pub fn data_dir() -> String {
        "data".into()
    }
    pub fn dictionary_dir() -> String {
        "dictionary".into()
    }
    pub fn index_file() -> String {
        ".seen_ids.json".into()
    }
    pub fn lock_file() -> String {
        ".archiver.lock".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
