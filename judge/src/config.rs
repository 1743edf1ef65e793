//! Configuration loading for the judge daemon.
//!
//! Loads `judge.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid. The
//! kernel, watchdog, worker and logging sections share their shape with the
//! agent's config.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use uranus::config::{
    load_toml_or_default, validate_common, worker_settings, KernelConfig, LoggingConfig,
    StorageConfig, WatchdogConfig, WorkerConfig,
};
use uranus::trust::DEFAULT_JUDGE_THRESHOLD;
use uranus::worker::WorkerSettings;

/// Default location of the judge config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/uranus/judge.toml";

/// Top-level judge configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JudgeConfig {
    /// Kernel module channel.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Observation database.
    #[serde(default)]
    pub storage: JudgeStorageConfig,

    /// Heartbeat watchdog.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Worker stop timing.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Promotion rule.
    #[serde(default)]
    pub judge: ThresholdConfig,
}

/// Observation database location and pool size.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeStorageConfig {
    /// SQLite database path.
    #[serde(default = "default_db")]
    pub db: PathBuf,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for JudgeStorageConfig {
    fn default() -> Self {
        Self {
            db: default_db(),
            max_connections: default_max_connections(),
        }
    }
}

impl JudgeStorageConfig {
    fn as_storage(&self) -> StorageConfig {
        StorageConfig {
            db: self.db.clone(),
            max_connections: self.max_connections,
        }
    }
}

/// When a command becomes trusted.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    /// Observations needed before a command is trusted.
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

impl JudgeConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_common(&self.kernel, &self.storage.as_storage(), &self.watchdog)?;
        if self.judge.threshold < 1 {
            anyhow::bail!("judge.threshold must be at least 1");
        }
        Ok(())
    }

    /// Worker timing derived from the config.
    pub fn worker_settings(&self) -> WorkerSettings {
        worker_settings(&self.watchdog, &self.worker)
    }
}

fn default_db() -> PathBuf {
    PathBuf::from("/var/lib/uranus/judge.db")
}
fn default_max_connections() -> u32 {
    4
}
fn default_threshold() -> i64 {
    DEFAULT_JUDGE_THRESHOLD
}

/// Load the judge config, falling back to defaults if `path` does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_judge_config(path: &Path) -> anyhow::Result<JudgeConfig> {
    let config: JudgeConfig = load_toml_or_default(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}
