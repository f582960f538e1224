//! Runtime configuration.
//!
//! Loaded from TOML by the application shell. Every section is optional and
//! falls back to the documented defaults; unknown fields are rejected.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::report::{
    ReportMode, ReporterConfig, DEFAULT_LOG_STORAGE_KEY, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_PERSISTED_LOGS,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    pub mode: ReportMode,
    pub cache: CacheSection,
    pub state: StateSection,
    pub remote: RemoteSection,
    pub reporter: ReporterSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheSection {
    pub max_size: usize,
    pub default_ttl_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl CacheSection {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StateSection {
    /// Prefix for durable keys.
    pub prefix: String,
    pub retention_days: u32,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            prefix: "wave-space-".to_string(),
            retention_days: 7,
        }
    }
}

impl StateSection {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RemoteSection {
    /// Base URL for the HTTP backend. Unset when requests go through an
    /// injected backend.
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Endpoint that receives critical error records in production.
    pub error_report_endpoint: Option<String>,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            error_report_endpoint: None,
        }
    }
}

impl RemoteSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReporterSection {
    pub max_log_size: usize,
    pub max_persisted_logs: usize,
    pub log_storage_key: String,
    /// Install a panic hook that reports uncaught panics as critical.
    pub capture_panics: bool,
}

impl Default for ReporterSection {
    fn default() -> Self {
        Self {
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            max_persisted_logs: DEFAULT_MAX_PERSISTED_LOGS,
            log_storage_key: DEFAULT_LOG_STORAGE_KEY.to_string(),
            capture_panics: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.default_ttl_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.state.prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "state.prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if self.state.retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "state.retention_days",
                reason: "must be > 0".to_string(),
            });
        }
        if self.remote.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.remote.retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.retry_attempts",
                reason: "must be >= 1".to_string(),
            });
        }
        if let Some(base_url) = &self.remote.base_url {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "remote.base_url",
                    reason: "must start with http:// or https://".to_string(),
                });
            }
        }
        if self.reporter.max_log_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reporter.max_log_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reporter.log_storage_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "reporter.log_storage_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Reporter settings derived from this config.
    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            mode: self.mode,
            max_log_size: self.reporter.max_log_size,
            max_persisted_logs: self.reporter.max_persisted_logs,
            log_storage_key: self.reporter.log_storage_key.clone(),
            url: None,
        }
    }
}
