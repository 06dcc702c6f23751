//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `render_timeout_ms` is under 100ms or over 5 minutes
    /// - `fast_tier_capacity` is 0
    /// - `rate_limit` is 0 or the window is 0 / over an hour
    /// - retry settings are 0 or `retry_max_attempts` exceeds 10
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_timeout_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "render_timeout_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }
        if self.render_timeout_ms > 5 * 60 * 1000 {
            return Err(ConfigError::Invalid {
                field: "render_timeout_ms".into(),
                reason: "must not exceed 5 minutes".into(),
            });
        }

        if self.fast_tier_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "fast_tier_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.rate_limit == 0 {
            return Err(ConfigError::Invalid { field: "rate_limit".into(), reason: "must be greater than 0".into() });
        }
        if self.rate_limit_window_secs == 0 || self.rate_limit_window_secs > 3600 {
            return Err(ConfigError::Invalid {
                field: "rate_limit_window_secs".into(),
                reason: "must be between 1 and 3600".into(),
            });
        }

        if self.retry_max_attempts == 0 || self.retry_max_attempts > 10 {
            return Err(ConfigError::Invalid {
                field: "retry_max_attempts".into(),
                reason: "must be between 1 and 10".into(),
            });
        }
        if self.retry_base_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_base_delay_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.retry_multiplier == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_multiplier".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.dispatch_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch_interval_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if let Some(bucket) = &self.storage_bucket
            && bucket.trim().is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "storage_bucket".into(),
                reason: "must not be empty when set".into(),
            });
        }

        Ok(())
    }
}
