//! Configuration loading and validation.
//!
//! Loads `uranus.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so an empty file, or no file at all, is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::session::Endpoint;
use crate::worker::WorkerSettings;

/// Default location of the agent config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/uranus/uranus.toml";

/// Largest accepted `kernel.exec_timeout_ms` (one hour).
pub const MAX_EXEC_TIMEOUT_MS: u64 = 3_600_000;

/// Largest accepted `watchdog.interval_secs` (one day).
pub const MAX_WATCHDOG_INTERVAL_SECS: u64 = 86_400;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    /// Kernel module channel.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Policy database.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Heartbeat watchdog.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Worker stop timing.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the kernel module listens and where local sockets go.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    /// Well-known socket of the kernel module.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Directory for per-session local sockets.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// File-name prefix for per-session local sockets.
    #[serde(default = "default_local_prefix")]
    pub local_prefix: String,

    /// Reply deadline for one-shot requests, in milliseconds.
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            local_dir: default_local_dir(),
            local_prefix: default_local_prefix(),
            exec_timeout_ms: default_exec_timeout_ms(),
        }
    }
}

impl KernelConfig {
    /// Session endpoint described by this section.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            peer: self.socket.clone(),
            local_dir: self.local_dir.clone(),
            local_prefix: self.local_prefix.clone(),
            exec_timeout: Duration::from_millis(self.exec_timeout_ms),
        }
    }
}

/// Policy database location and pool size.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path.
    #[serde(default = "default_db")]
    pub db: PathBuf,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db: default_db(),
            max_connections: default_max_connections(),
        }
    }
}

/// Heartbeat watchdog timing.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds without a heartbeat before the agent gives up.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Worker stop timing.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Pause after the disable commands before closing, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Bound on waiting for in-flight handlers, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Log output location.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs.
    #[serde(default = "default_logs_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
        }
    }
}

/// Combine watchdog and worker sections into worker settings.
pub fn worker_settings(watchdog: &WatchdogConfig, worker: &WorkerConfig) -> WorkerSettings {
    WorkerSettings {
        watchdog_interval: Duration::from_secs(watchdog.interval_secs),
        settle: Duration::from_millis(worker.settle_ms),
        drain_timeout: Duration::from_millis(worker.drain_timeout_ms),
    }
}

/// Check the sections every binary shares.
///
/// # Errors
///
/// Returns an error naming the first invalid field.
pub fn validate_common(
    kernel: &KernelConfig,
    storage: &StorageConfig,
    watchdog: &WatchdogConfig,
) -> anyhow::Result<()> {
    if kernel.socket.as_os_str().is_empty() {
        anyhow::bail!("kernel.socket must not be empty");
    }
    if kernel.exec_timeout_ms == 0 {
        anyhow::bail!("kernel.exec_timeout_ms must be greater than zero");
    }
    if kernel.exec_timeout_ms > MAX_EXEC_TIMEOUT_MS {
        anyhow::bail!("kernel.exec_timeout_ms must be at most {MAX_EXEC_TIMEOUT_MS}");
    }
    if storage.max_connections == 0 {
        anyhow::bail!("storage.max_connections must be greater than zero");
    }
    if watchdog.interval_secs == 0 {
        anyhow::bail!("watchdog.interval_secs must be greater than zero");
    }
    if watchdog.interval_secs > MAX_WATCHDOG_INTERVAL_SECS {
        anyhow::bail!("watchdog.interval_secs must be at most {MAX_WATCHDOG_INTERVAL_SECS}");
    }
    Ok(())
}

impl AgentConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_common(&self.kernel, &self.storage, &self.watchdog)
    }

    /// Worker timing derived from the config.
    pub fn worker_settings(&self) -> WorkerSettings {
        worker_settings(&self.watchdog, &self.worker)
    }
}

// Default value functions for serde

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/hackernel.sock")
}
fn default_local_dir() -> PathBuf {
    PathBuf::from("/tmp")
}
fn default_local_prefix() -> String {
    "hackernel".to_owned()
}
fn default_exec_timeout_ms() -> u64 {
    1000
}
fn default_db() -> PathBuf {
    PathBuf::from("/var/lib/uranus/uranus.db")
}
fn default_max_connections() -> u32 {
    4
}
fn default_interval_secs() -> u64 {
    10
}
fn default_settle_ms() -> u64 {
    1000
}
fn default_drain_timeout_ms() -> u64 {
    2000
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("/var/log/uranus")
}

/// Load the agent config, falling back to defaults if `path` does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_config(path: &Path) -> anyhow::Result<AgentConfig> {
    let config: AgentConfig = load_toml_or_default(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}

/// Parse a TOML file, or return `T::default()` if it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_toml_or_default<T>(path: &Path) -> anyhow::Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config at {}", path.display()))
}
