//! Error taxonomy: kinds, levels, and the user-facing message table.
//!
//! Classification never surfaces the raw internal message to the user. The
//! text shown always comes from [`TAXONOMY`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::raised::{ParsedError, RaisedError};

// ============================================================================
// KINDS AND LEVELS
// ============================================================================

/// Category of a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Expired or invalid session
    Auth,
    /// Fetch failure, refused connection, timeout
    Network,
    /// Malformed caller input
    Validation,
    /// Authorization denial
    Permission,
    RateLimit,
    NotFound,
    Server,
    #[default]
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::RateLimit => "rate-limit",
            Self::NotFound => "not-found",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a handled error. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned for level names outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for ErrorLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

// ============================================================================
// MESSAGE TABLE
// ============================================================================

/// One row of the taxonomy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyEntry {
    /// Exact error code, also matched as a fragment of free-form messages.
    pub code: &'static str,
    pub kind: ErrorKind,
    /// Text shown to the user.
    pub message: &'static str,
}

const fn entry(code: &'static str, kind: ErrorKind, message: &'static str) -> TaxonomyEntry {
    TaxonomyEntry {
        code,
        kind,
        message,
    }
}

/// The taxonomy table. Fragment matching walks it in order, so more specific
/// codes come before generic ones.
pub static TAXONOMY: &[TaxonomyEntry] = &[
    // Authentication (identity provider)
    entry("auth/invalid-email", ErrorKind::Validation, "Please enter a valid email address."),
    entry("auth/user-disabled", ErrorKind::Auth, "This account has been disabled. Please contact an administrator."),
    entry("auth/user-not-found", ErrorKind::Auth, "No account is registered with these details."),
    entry("auth/wrong-password", ErrorKind::Auth, "The password does not match."),
    entry("auth/email-already-in-use", ErrorKind::Validation, "This email address is already in use."),
    entry("auth/weak-password", ErrorKind::Validation, "Passwords must be at least 6 characters long."),
    entry("auth/requires-recent-login", ErrorKind::Auth, "For your security, please sign in again."),
    entry("auth/network-request-failed", ErrorKind::Network, "Please check your network connection."),
    // Authentication (backend)
    entry("invalid_grant", ErrorKind::Auth, "Your session has expired. Please sign in again."),
    entry("invalid_password", ErrorKind::Auth, "The password does not match."),
    entry("User already registered", ErrorKind::Validation, "This user is already registered."),
    entry("Invalid login credentials", ErrorKind::Auth, "The ID or password does not match."),
    entry("Email not confirmed", ErrorKind::Auth, "Email verification is required. Please check your inbox."),
    entry("PGRST116", ErrorKind::Permission, "You do not have access to this resource."),
    // Network
    entry("NetworkError", ErrorKind::Network, "Please check your network connection."),
    entry("Failed to fetch", ErrorKind::Network, "Cannot reach the server. Please try again shortly."),
    entry("Network request failed", ErrorKind::Network, "A network error occurred."),
    entry("ECONNREFUSED", ErrorKind::Network, "Cannot connect to the server."),
    entry("ETIMEDOUT", ErrorKind::Network, "The request timed out."),
    // Permission
    entry("permission-denied", ErrorKind::Permission, "You do not have access to this resource."),
    entry("insufficient-permissions", ErrorKind::Permission, "You do not have permission to perform this action."),
    entry("unauthorized", ErrorKind::Auth, "Please sign in to use this service."),
    // Validation
    entry("validation/empty-field", ErrorKind::Validation, "Please fill in the required fields."),
    entry("validation/invalid-format", ErrorKind::Validation, "Please use the correct format."),
    entry("validation/too-short", ErrorKind::Validation, "The value is too short."),
    entry("validation/too-long", ErrorKind::Validation, "The value is too long."),
    entry("validation/invalid-phone", ErrorKind::Validation, "Please enter a valid phone number."),
    entry("validation/invalid-business-number", ErrorKind::Validation, "Please enter a valid business registration number."),
    // Files
    entry("file/too-large", ErrorKind::Validation, "The file is too large (max 10MB)."),
    entry("file/invalid-type", ErrorKind::Validation, "This file type is not supported."),
    entry("file/upload-failed", ErrorKind::Server, "The file upload failed."),
    entry("file/not-found", ErrorKind::NotFound, "The file could not be found."),
    // Business rules
    entry("points/insufficient", ErrorKind::Validation, "You do not have enough points."),
    entry("membership/expired", ErrorKind::Permission, "Your membership has expired."),
    entry("content/blocked", ErrorKind::Permission, "This content has been blocked."),
    entry("rate-limit", ErrorKind::RateLimit, "Too many requests. Please try again shortly."),
    // Generic
    entry("not-found", ErrorKind::NotFound, "The requested information could not be found."),
    entry("server-error", ErrorKind::Server, "A server error occurred. Please try again shortly."),
    entry("timeout", ErrorKind::Network, "The request timed out."),
    entry("cancelled", ErrorKind::Unknown, "The request was cancelled."),
    entry("unknown-error", ErrorKind::Unknown, "An unknown error occurred."),
];

/// Look up a row by exact code.
pub fn lookup(code: &str) -> Option<&'static TaxonomyEntry> {
    TAXONOMY.iter().find(|e| e.code == code)
}

fn fallback(code: &str) -> &'static TaxonomyEntry {
    static UNKNOWN: TaxonomyEntry = entry("unknown-error", ErrorKind::Unknown, "An unknown error occurred.");
    lookup(code).unwrap_or(&UNKNOWN)
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Result of classifying a raised error.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Internal message, for logs only.
    pub message: String,
    pub kind: ErrorKind,
    /// Code as raised, or the taxonomy code the message matched.
    pub code: Option<String>,
    /// Text safe to show the user.
    pub user_message: &'static str,
}

/// Classify a raised error.
///
/// Order: exact code, then case-insensitive table fragments in the message,
/// then keyword fallbacks, then `unknown`.
pub fn classify(error: &RaisedError) -> Classification {
    classify_parsed(&error.parse())
}

pub fn classify_parsed(parsed: &ParsedError) -> Classification {
    let matched = parsed
        .code
        .as_deref()
        .and_then(lookup)
        .or_else(|| match_fragment(&parsed.message))
        .unwrap_or_else(|| keyword_fallback(&parsed.message));

    Classification {
        message: parsed.message.clone(),
        kind: matched.kind,
        code: parsed
            .code
            .clone()
            .or_else(|| (matched.code != "unknown-error").then(|| matched.code.to_string())),
        user_message: matched.message,
    }
}

fn match_fragment(message: &str) -> Option<&'static TaxonomyEntry> {
    let lowered = message.to_lowercase();
    TAXONOMY
        .iter()
        .find(|e| lowered.contains(&e.code.to_lowercase()))
}

fn keyword_fallback(message: &str) -> &'static TaxonomyEntry {
    let lowered = message.to_lowercase();
    if lowered.contains("network") || lowered.contains("fetch") {
        fallback("NetworkError")
    } else if lowered.contains("permission") || lowered.contains("auth") {
        fallback("permission-denied")
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        fallback("timeout")
    } else {
        fallback("unknown-error")
    }
}
