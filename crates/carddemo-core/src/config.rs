//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, per-call timeout, retry policy, session refresh buffer and
//! notification queue limits.
//!
//! Configuration is stored at `~/.config/carddemo-client/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/data directory paths
const APP_NAME: &str = "carddemo-client";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Storage file name for the file-backed session store
const STORAGE_FILE: &str = "storage.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "CARDDEMO_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("notification capacity must be at least 1")]
    ZeroCapacity,

    #[error("retry base delay must be greater than zero")]
    ZeroBaseDelay,

    #[error("retry max delay ({max_ms}ms) is below the base delay ({base_ms}ms)")]
    MaxBelowBase { base_ms: u64, max_ms: u64 },

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_buffer_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: 300,
        }
    }
}

impl SessionConfig {
    /// Revalidation window before expiry. Values past chrono's range saturate.
    pub fn refresh_buffer(&self) -> chrono::Duration {
        i64::try_from(self.refresh_buffer_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub capacity: usize,
    pub default_duration_ms: u64,
    pub error_duration_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            default_duration_ms: 5000,
            error_duration_ms: 7000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub notifications: NotificationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from the config file (defaults if missing), then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notifications.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::ZeroBaseDelay);
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::MaxBelowBase {
                base_ms: self.retry.base_delay_ms,
                max_ms: self.retry.max_delay_ms,
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Location of the file-backed session store.
    pub fn storage_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(STORAGE_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.notifications.capacity, 5);
        assert_eq!(config.session.refresh_buffer_secs, 300);
        assert_eq!(config.session.refresh_buffer(), chrono::Duration::minutes(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base_url": "https://api.example.com", "retry": {"max_retries": 5}}"#)
                .unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.notifications, NotificationConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.notifications.capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let mut config = ClientConfig::default();
        config.retry.max_delay_ms = 500;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MaxBelowBase { base_ms: 1000, max_ms: 500 })
        );

        let mut config = ClientConfig::default();
        config.retry.base_delay_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBaseDelay));
    }
}
