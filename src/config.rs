//! Application config loaded from `config.toml`, with CLI flags layered
//! on top by the binaries.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`. Every
/// field has a default, so an absent file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// What to watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Leaderboard page URL.
    #[serde(default = "default_url")]
    pub url: String,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for transient network failures.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base backoff in seconds between retries; doubles each retry.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: f64,
    /// Consecutive checks that must observe a new fingerprint before it
    /// counts as a change.
    #[serde(default = "default_confirmation_checks")]
    pub confirmation_checks: u32,
    /// Randomized delay bounds between loop checks, in seconds.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// How many top models notifications focus on.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_url() -> String {
    crate::DEFAULT_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> f64 {
    2.0
}

fn default_confirmation_checks() -> u32 {
    2
}

fn default_min_interval_secs() -> u64 {
    120
}

fn default_max_interval_secs() -> u64 {
    300
}

fn default_top_n() -> usize {
    10
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            confirmation_checks: default_confirmation_checks(),
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            top_n: default_top_n(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config when the file exists, defaults otherwise. A present
    /// but malformed file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
