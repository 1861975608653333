//! Application configuration management.
//!
//! Configuration is stored at `~/.config/flagcache/config.json` (platform
//! equivalent via `dirs`). Environment variables override the file:
//! `FLAGCACHE_BASE_URL`, and `FLAGCACHE_TOKEN` / `FLAGCACHE_USER_ID` which
//! come from the host's auth layer and are never written to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::monitor::{MonitorConfig, DEFAULT_POLL_INTERVAL};
use crate::service::{FlagServiceConfig, DEFAULT_REFRESH_INTERVAL};

/// Application name used for config directory paths
const APP_NAME: &str = "flagcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BASE_URL: &str = "FLAGCACHE_BASE_URL";
pub const ENV_TOKEN: &str = "FLAGCACHE_TOKEN";
pub const ENV_USER_ID: &str = "FLAGCACHE_USER_ID";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub auto_refresh: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            monitor_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            auto_refresh: true,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults if absent.
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

    /// Apply `FLAGCACHE_BASE_URL` if set.
    pub fn apply_env(&mut self) {
        if let Some(url) = env_non_empty(ENV_BASE_URL) {
            self.base_url = url;
        }
    }

    pub fn token_from_env() -> Option<String> {
        env_non_empty(ENV_TOKEN)
    }

    pub fn user_id_from_env() -> Option<String> {
        env_non_empty(ENV_USER_ID)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn service_config(&self) -> FlagServiceConfig {
        FlagServiceConfig {
            refresh_interval: interval_or_default(
                "refresh_interval_secs",
                self.refresh_interval_secs,
                DEFAULT_REFRESH_INTERVAL,
            ),
            auto_refresh: self.auto_refresh,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: interval_or_default(
                "monitor_interval_secs",
                self.monitor_interval_secs,
                DEFAULT_POLL_INTERVAL,
            ),
            auto_refresh: self.auto_refresh,
        }
    }
}

/// A zero period would make the timer spin; fall back to the default.
fn interval_or_default(key: &str, secs: u64, default: Duration) -> Duration {
    if secs == 0 {
        warn!(
            key,
            default_secs = default.as_secs(),
            "Interval of 0 seconds is not allowed, using default"
        );
        default
    } else {
        Duration::from_secs(secs)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
