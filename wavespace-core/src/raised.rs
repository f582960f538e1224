//! The shapes an error can take when it reaches the reporter.

use serde_json::Value;
use std::fmt;

use crate::error::{RemoteError, StorageError, WavespaceError};

/// A raised error before classification.
///
/// Callers hand the reporter whatever they caught: a bare message, a native
/// Rust error, or a structured payload from the backend. [`RaisedError::parse`]
/// is the single place these shapes are normalised.
#[derive(Debug, Clone, PartialEq)]
pub enum RaisedError {
    /// A bare message.
    Text(String),

    /// A Rust error (or a caught panic).
    Native {
        name: String,
        message: String,
        code: Option<String>,
    },

    /// A structured payload, typically JSON from the backend.
    Structured {
        message: Option<String>,
        code: Option<String>,
        details: Option<Value>,
    },
}

/// Which shape a parsed error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Text,
    Native,
    Structured,
}

/// Normalised view of a [`RaisedError`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedError {
    pub source: ErrorSource,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
}

impl RaisedError {
    /// Wrap a native error, keeping its type name for diagnostics.
    pub fn native<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::Native {
            name: short_type_name::<E>(),
            message: err.to_string(),
            code: None,
        }
    }

    /// A native error with an explicit taxonomy code.
    pub fn with_code(name: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Native {
            name: name.into(),
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Normalise an arbitrary JSON value.
    ///
    /// Objects contribute `message` (or `msg`), `code` (or `error_code`) and
    /// `details`; strings become [`RaisedError::Text`]; anything else is an
    /// unknown structured error.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s.clone()),
            Value::Object(fields) => {
                let text = |keys: &[&str]| {
                    keys.iter().find_map(|k| match fields.get(*k) {
                        Some(Value::String(s)) => Some(s.clone()),
                        Some(Value::Number(n)) => Some(n.to_string()),
                        _ => None,
                    })
                };
                Self::Structured {
                    message: text(&["message", "msg"]),
                    code: text(&["code", "error_code"]),
                    details: fields.get("details").cloned(),
                }
            }
            _ => Self::Structured {
                message: None,
                code: None,
                details: Some(value.clone()),
            },
        }
    }

    /// Build an error from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        Self::Native {
            name: "panic".to_string(),
            message,
            code: None,
        }
    }

    /// Normalise into message, code and details.
    pub fn parse(&self) -> ParsedError {
        match self {
            Self::Text(message) => ParsedError {
                source: ErrorSource::Text,
                message: message.clone(),
                code: None,
                details: None,
            },
            Self::Native { message, code, .. } => ParsedError {
                source: ErrorSource::Native,
                message: message.clone(),
                code: code.clone(),
                details: None,
            },
            Self::Structured {
                message,
                code,
                details,
            } => ParsedError {
                source: ErrorSource::Structured,
                message: message.clone().unwrap_or_else(|| "Unknown error".to_string()),
                code: code.clone(),
                details: details.clone(),
            },
        }
    }
}

impl fmt::Display for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parsed = self.parse();
        match parsed.code {
            Some(code) => write!(f, "{} ({})", parsed.message, code),
            None => f.write_str(&parsed.message),
        }
    }
}

impl From<&str> for RaisedError {
    fn from(message: &str) -> Self {
        Self::Text(message.to_string())
    }
}

impl From<String> for RaisedError {
    fn from(message: String) -> Self {
        Self::Text(message)
    }
}

impl From<RemoteError> for RaisedError {
    fn from(err: RemoteError) -> Self {
        Self::with_code("RemoteError", err.to_string(), err.taxonomy_code())
    }
}

impl From<StorageError> for RaisedError {
    fn from(err: StorageError) -> Self {
        Self::native(&err)
    }
}

impl From<WavespaceError> for RaisedError {
    fn from(err: WavespaceError) -> Self {
        match err {
            WavespaceError::Remote(remote) => remote.into(),
            other => Self::native(&other),
        }
    }
}

fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}
