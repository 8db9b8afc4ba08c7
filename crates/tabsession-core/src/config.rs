//! Session policy configuration.
//!
//! The configuration holds the idle timeout, the warning window, how early
//! to renew the access credential, and the session bus capacity. It is
//! stored at `~/.config/tabsession/config.json`; a missing file means
//! defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::timers::IdlePolicy;

/// Application name used for the config directory path
const APP_NAME: &str = "tabsession";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Sign out after 15 minutes without input.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15 * 60;

/// Warn during the last minute.
const DEFAULT_WARNING_WINDOW_SECS: u64 = 60;

/// Renew the credential one minute before it expires.
const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;

const DEFAULT_COUNTDOWN_INTERVAL_MS: u64 = 1000;

/// Messages a slow tab may fall behind on the bus before it skips ahead.
const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub idle_timeout_secs: u64,
    pub warning_window_secs: u64,
    pub refresh_margin_secs: u64,
    pub countdown_interval_ms: u64,
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            warning_window_secs: DEFAULT_WARNING_WINDOW_SECS,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            countdown_interval_ms: DEFAULT_COUNTDOWN_INTERVAL_MS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Validate into the policy the controller runs with.
    pub fn policy(&self) -> Result<SessionPolicy, ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Zero("idle timeout"));
        }
        if self.refresh_margin_secs == 0 {
            return Err(ConfigError::Zero("refresh margin"));
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError::Zero("bus capacity"));
        }
        let idle = IdlePolicy::new(
            Duration::from_secs(self.idle_timeout_secs),
            Duration::from_secs(self.warning_window_secs),
        )?
        .with_countdown_interval(Duration::from_millis(self.countdown_interval_ms))?;

        Ok(SessionPolicy {
            idle,
            refresh_margin: Duration::from_secs(self.refresh_margin_secs),
            bus_capacity: self.bus_capacity,
        })
    }
}

/// Validated settings for one tab's session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub idle: IdlePolicy,
    pub refresh_margin: Duration,
    pub bus_capacity: usize,
}

impl SessionPolicy {
    pub fn new(idle: IdlePolicy, refresh_margin: Duration) -> Self {
        Self {
            idle,
            refresh_margin,
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}
