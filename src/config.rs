use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "SHOOTFLOW_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub shoot: ShootControllerConfig,
}

/// Knobs of the Shoot reconcile controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShootControllerConfig {
    /// Wall-clock budget for one retry cycle before a failure turns terminal.
    pub retry_duration_secs: u64,
    /// Interval at which failing reconcile steps are retried.
    pub default_retry_interval_secs: u64,
    /// Backoff suggested to the caller after a retryable failure.
    pub sync_period_secs: u64,
}

impl Default for ShootControllerConfig {
    fn default() -> Self {
        Self {
            retry_duration_secs: 24 * 60 * 60,
            default_retry_interval_secs: 30,
            sync_period_secs: 5 * 60,
        }
    }
}

impl ShootControllerConfig {
    pub fn retry_duration(&self) -> Duration {
        Duration::from_secs(self.retry_duration_secs)
    }

    pub fn default_retry_interval(&self) -> Duration {
        Duration::from_secs(self.default_retry_interval_secs)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }
}

impl Config {
    pub fn shootflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or(Error::NoHomeDir)?
            .join(".shootflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(expand_tilde(&path.to_string_lossy()));
        }
        Ok(Self::shootflow_dir()?.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            retry_duration_secs = config.shoot.retry_duration_secs,
            default_retry_interval_secs = config.shoot.default_retry_interval_secs,
            sync_period_secs = config.shoot.sync_period_secs,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shoot.default_retry_interval_secs == 0 {
            return Err(Error::Validation(
                "shoot.default_retry_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
