//! WAVE SPACE Core
//!
//! Leaf crate of the client runtime: input sanitization, the error taxonomy
//! and reporter, crate error types, the clock and durable-storage seams, and
//! runtime configuration. Every other crate depends on this one.

pub mod clock;
pub mod config;
pub mod durable;
pub mod error;
pub mod raised;
pub mod report;
pub mod sanitize;
pub mod taxonomy;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheSection, LoggingSection, RemoteSection, ReporterSection, RuntimeConfig, StateSection};
pub use durable::{DurableStorage, MemoryStorage, SharedStorage};
pub use error::{ConfigError, RemoteError, StorageError, StorageResult, WavespaceError, WavespaceResult};
pub use raised::{ErrorSource, ParsedError, RaisedError};
pub use report::{
    catch_contained, ErrorRecord, ErrorReporter, ErrorSink, HeadlessPrompt, Notification, Notifier, ReportMode, ReportOptions,
    ReporterConfig, UserPrompt,
};
pub use sanitize::{
    detect_xss, escape_html, safe_attr, safe_url, sanitize, sanitize_html, sanitize_input, sanitize_value, InputKind,
    ALLOWED_TAGS,
};
pub use taxonomy::{classify, Classification, ErrorKind, ErrorLevel, TaxonomyEntry, UnknownLevel, TAXONOMY};

/// Shared reporter handle.
pub type SharedReporter = std::sync::Arc<ErrorReporter>;
