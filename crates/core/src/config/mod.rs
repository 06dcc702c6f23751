//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PRERENDER_*)
//! 2. TOML config file (if PRERENDER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PRERENDER_*)
/// 2. TOML config file (if PRERENDER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite metadata/job database.
    ///
    /// Set via PRERENDER_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Object-store bucket for durable rendered HTML.
    ///
    /// Set via PRERENDER_STORAGE_BUCKET environment variable. When unset,
    /// durable content operations are no-ops and only the fast tier plus
    /// metadata are used.
    #[serde(default)]
    pub storage_bucket: Option<String>,

    /// Mandatory per-job render timeout in milliseconds.
    ///
    /// Set via PRERENDER_RENDER_TIMEOUT_MS environment variable.
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Entry cap for the in-memory fast tier.
    ///
    /// Set via PRERENDER_FAST_TIER_CAPACITY environment variable.
    #[serde(default = "default_fast_tier_capacity")]
    pub fast_tier_capacity: usize,

    /// Requests allowed per subject per window.
    ///
    /// Set via PRERENDER_RATE_LIMIT environment variable.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Sliding rate-limit window in seconds.
    ///
    /// Set via PRERENDER_RATE_LIMIT_WINDOW_SECS environment variable.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Total render attempts per job, including the first.
    ///
    /// Set via PRERENDER_RETRY_MAX_ATTEMPTS environment variable.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Backoff after the first failure, in milliseconds.
    ///
    /// Set via PRERENDER_RETRY_BASE_DELAY_MS environment variable.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff multiplier per consecutive failure.
    ///
    /// Set via PRERENDER_RETRY_MULTIPLIER environment variable.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: u32,

    /// Dispatcher poll interval in milliseconds.
    ///
    /// Set via PRERENDER_DISPATCH_INTERVAL_MS environment variable.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./prerender.sqlite")
}

fn default_render_timeout_ms() -> u64 {
    30_000
}

fn default_fast_tier_capacity() -> usize {
    1024
}

fn default_rate_limit() -> u32 {
    60
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    5_000
}

fn default_retry_multiplier() -> u32 {
    5
}

fn default_dispatch_interval_ms() -> u64 {
    1_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_bucket: None,
            render_timeout_ms: default_render_timeout_ms(),
            fast_tier_capacity: default_fast_tier_capacity(),
            rate_limit: default_rate_limit(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Render timeout as Duration for use with tokio.
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Rate-limit window as Duration.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Dispatcher poll interval as Duration.
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Retry policy value object for the job state machine.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PRERENDER_`
    /// 2. TOML file from `PRERENDER_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PRERENDER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PRERENDER_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./prerender.sqlite"));
        assert!(config.storage_bucket.is_none());
        assert_eq!(config.render_timeout_ms, 30_000);
        assert_eq!(config.fast_tier_capacity, 1024);
        assert_eq!(config.rate_limit, 60);
        assert_eq!(config.rate_limit_window_secs, 60);
        assert_eq!(config.retry_max_attempts, 3);
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.render_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = AppConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(2), Duration::from_secs(25));
    }
}
