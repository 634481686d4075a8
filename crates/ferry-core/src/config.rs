//! Configuration for ferry
//!
//! Loaded from a TOML file, then overridden by `FERRY_*` environment
//! variables. Every section has defaults, so an empty file (or no file) is a
//! valid configuration apart from the queue name and sandbox location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FerryError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FerryConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FerryConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FerryError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FerryError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, FerryError> {
        toml::from_str(content)
            .map_err(|e| FerryError::Config(format!("failed to parse config: {e}")))
    }

    /// File (if any) first, environment on top.
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self, FerryError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `FERRY_*` overrides read through `lookup`. Malformed numbers and
    /// flags are configuration errors rather than silently ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), FerryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FERRY_STORE_URL") {
            self.store.url = url;
        }
        if let Some(prefix) = lookup("FERRY_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }
        if let Some(size) = lookup("FERRY_POOL_SIZE") {
            self.store.pool_size = parse_env("FERRY_POOL_SIZE", &size)?;
        }

        if let Some(name) = lookup("FERRY_QUEUE") {
            self.queue.name = name;
        }
        if let Some(flag) = lookup("FERRY_RECYCLE_TASKS") {
            self.queue.recycle_tasks = parse_env("FERRY_RECYCLE_TASKS", &flag)?;
        }
        if let Some(max) = lookup("FERRY_MAX_RETRIES") {
            self.queue.max_retries = parse_env("FERRY_MAX_RETRIES", &max)?;
        }
        if let Some(flag) = lookup("FERRY_PURGE_SUCCESSFUL") {
            self.queue.purge_successful = parse_env("FERRY_PURGE_SUCCESSFUL", &flag)?;
        }

        if let Some(ms) = lookup("FERRY_IDLE_SLEEP_MS") {
            self.worker.idle_sleep_ms = parse_env("FERRY_IDLE_SLEEP_MS", &ms)?;
        }
        if let Some(ms) = lookup("FERRY_DISPATCH_PAUSE_MS") {
            self.worker.dispatch_pause_ms = parse_env("FERRY_DISPATCH_PAUSE_MS", &ms)?;
        }
        if let Some(ms) = lookup("FERRY_STOP_JOIN_TIMEOUT_MS") {
            self.worker.stop_join_timeout_ms = parse_env("FERRY_STOP_JOIN_TIMEOUT_MS", &ms)?;
        }
        if let Some(retries) = lookup("FERRY_SANDBOX_RELEASE_RETRIES") {
            self.worker.sandbox_release_retries =
                parse_env("FERRY_SANDBOX_RELEASE_RETRIES", &retries)?;
        }

        if let Some(location) = lookup("FERRY_SANDBOX_LOCATION") {
            self.sandbox.location = PathBuf::from(location);
        }
        if let Some(entry_point) = lookup("FERRY_SANDBOX_ENTRY_POINT") {
            self.sandbox.entry_point = entry_point;
        }

        if let Some(level) = lookup("FERRY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("FERRY_LOG_FORMAT") {
            self.logging.format = format.parse().map_err(FerryError::Config)?;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, FerryError> {
    value
        .trim()
        .parse()
        .map_err(|_| FerryError::Config(format!("{key}: cannot parse {value:?}")))
}

/// Shared store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Namespace for every derived key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_key_prefix() -> String {
    crate::domain::DEFAULT_KEY_PREFIX.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Queue selection and the recycling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub recycle_tasks: bool,

    /// 0 = unlimited
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub purge_successful: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            recycle_tasks: default_true(),
            max_retries: default_max_retries(),
            purge_successful: false,
        }
    }
}

/// Worker loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Idle wait between drain cycles.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Pause after every dispatch.
    #[serde(default = "default_dispatch_pause_ms")]
    pub dispatch_pause_ms: u64,

    /// How long Stop waits for the loop before aborting it.
    #[serde(default = "default_stop_join_timeout_ms")]
    pub stop_join_timeout_ms: u64,

    /// Extra teardown attempts after the first one fails.
    #[serde(default = "default_sandbox_release_retries")]
    pub sandbox_release_retries: u32,
}

fn default_idle_sleep_ms() -> u64 {
    5_000
}

fn default_dispatch_pause_ms() -> u64 {
    10
}

fn default_stop_join_timeout_ms() -> u64 {
    2_000
}

fn default_sandbox_release_retries() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: default_idle_sleep_ms(),
            dispatch_pause_ms: default_dispatch_pause_ms(),
            stop_join_timeout_ms: default_stop_join_timeout_ms(),
            sandbox_release_retries: default_sandbox_release_retries(),
        }
    }
}

impl WorkerConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn dispatch_pause(&self) -> Duration {
        Duration::from_millis(self.dispatch_pause_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}

/// Where the execution capability lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Absolute, or relative to the working directory or the executable.
    #[serde(default)]
    pub location: PathBuf,

    #[serde(default)]
    pub entry_point: String,

    /// Extra arguments for process sandboxes.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
