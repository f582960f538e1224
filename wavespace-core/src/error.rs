//! Error types for WAVE SPACE runtime operations

use thiserror::Error;

/// Durable storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage quota exceeded writing {key} ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },

    #[error("Read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Remote call errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Request to {endpoint} timed out after {after_ms}ms")]
    Timeout { endpoint: String, after_ms: u64 },

    #[error("HTTP {status} from {endpoint}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl RemoteError {
    /// Endpoint the failing request was addressed to.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Timeout { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Transport { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }

    /// Taxonomy code for this failure, used when classifying it.
    pub fn taxonomy_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "NetworkError",
            Self::Decode { .. } => "server-error",
            Self::Status { status, .. } => match *status {
                401 => "unauthorized",
                403 => "permission-denied",
                404 => "not-found",
                408 => "timeout",
                429 => "rate-limit",
                400 | 422 => "validation/invalid-format",
                _ => "server-error",
            },
        }
    }
}

/// Master error type for all WAVE SPACE errors.
#[derive(Debug, Error)]
pub enum WavespaceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

/// Result type alias for WAVE SPACE operations.
pub type WavespaceResult<T> = Result<T, WavespaceError>;

/// Result type alias for durable storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_quota() {
        let err = StorageError::QuotaExceeded {
            key: "wave-space-ui-settings".to_string(),
            bytes: 2048,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("quota exceeded"));
        assert!(msg.contains("wave-space-ui-settings"));
        assert!(msg.contains("2048"));
    }

    #[test]
    fn test_remote_error_display_status() {
        let err = RemoteError::Status {
            endpoint: "/posts".to_string(),
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("HTTP 503"));
        assert!(msg.contains("/posts"));
        assert_eq!(err.endpoint(), "/posts");
    }

    #[test]
    fn test_remote_error_taxonomy_codes() {
        let status = |status| RemoteError::Status {
            endpoint: "/x".to_string(),
            status,
            message: String::new(),
        };
        assert_eq!(status(401).taxonomy_code(), "unauthorized");
        assert_eq!(status(403).taxonomy_code(), "permission-denied");
        assert_eq!(status(404).taxonomy_code(), "not-found");
        assert_eq!(status(429).taxonomy_code(), "rate-limit");
        assert_eq!(status(500).taxonomy_code(), "server-error");
        let timeout = RemoteError::Timeout {
            endpoint: "/x".to_string(),
            after_ms: 30_000,
        };
        assert_eq!(timeout.taxonomy_code(), "timeout");
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "cache.max_size",
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cache.max_size"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_wavespace_error_from_variants() {
        let storage = WavespaceError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, WavespaceError::Storage(_)));

        let remote = WavespaceError::from(RemoteError::Transport {
            endpoint: "/x".to_string(),
            reason: "connection refused".to_string(),
        });
        assert!(matches!(remote, WavespaceError::Remote(_)));

        let config = WavespaceError::from(ConfigError::InvalidValue {
            field: "mode",
            reason: "bad".to_string(),
        });
        assert!(matches!(config, WavespaceError::Config(_)));
    }
}
